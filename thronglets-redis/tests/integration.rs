//! Integration tests requiring a running Redis server.
//!
//! Run with: cargo test -p thronglets-redis --test integration -- --ignored
//!
//! Set `THRONGLETS_TEST_REDIS_URL` to point at a server other than
//! `redis://localhost:6379`. Each test writes under its own key prefix.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thronglets_core::{
    AgentCard, AgentId, AppCard, ContextId, InternalMessage, Message, RegisteredAgent,
    RegisteredApp, Storage, Task, TaskFilter, TaskState, TaskStatus,
};
use thronglets_redis::{RedisConfig, RedisStorage};

async fn setup(config: RedisConfig) -> RedisStorage {
    let url = std::env::var("THRONGLETS_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let prefix = format!("thronglets-test:{}:", AgentId::new());
    let storage = RedisStorage::new(config.with_url(url).with_prefix(prefix));
    storage.connect().await.expect("Failed to connect to Redis");
    storage
}

fn app_card(name: &str) -> AppCard {
    AppCard {
        name: name.to_string(),
        description: "test app".to_string(),
        scenario: "testing".to_string(),
        mcp_endpoint: "http://localhost:9/mcp".to_string(),
        health_check_url: "http://localhost:9/health".to_string(),
        icon_url: None,
        tags: vec![],
    }
}

#[tokio::test]
#[ignore]
async fn test_agent_roundtrip_and_delete() {
    let storage = setup(RedisConfig::default()).await;
    assert!(storage.is_connected().await);

    let agent = RegisteredAgent::new(AgentCard::new("alice", "planner", "1.0"));
    storage.register_agent(agent.clone()).await.unwrap();

    let loaded = storage.get_agent(&agent.agent_id).await.unwrap().unwrap();
    assert_eq!(loaded, agent);
    assert_eq!(storage.list_agents().await.unwrap().len(), 1);

    let found = storage
        .find_agent_by_name("alice", Some("1.0"))
        .await
        .unwrap();
    assert_eq!(found.map(|a| a.agent_id), Some(agent.agent_id.clone()));

    assert!(storage.delete_agent(&agent.agent_id).await.unwrap());
    assert!(!storage.delete_agent(&agent.agent_id).await.unwrap());
    assert!(storage.list_agents().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_expired_agent_is_pruned_from_listing() {
    let storage = setup(RedisConfig::default().with_agent_ttl(1)).await;

    let agent = RegisteredAgent::new(AgentCard::new("ephemeral", "short-lived", "1.0"));
    storage.register_agent(agent.clone()).await.unwrap();
    assert_eq!(storage.list_agents().await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(storage.get_agent(&agent.agent_id).await.unwrap().is_none());
    assert!(storage.list_agents().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_messages_are_read_once() {
    let storage = setup(RedisConfig::default()).await;
    let bob = AgentId::from("bob");

    for text in ["one", "two", "three"] {
        let msg = InternalMessage::new(None, bob.clone(), Message::agent_text(text));
        storage.send_message(msg).await.unwrap();
    }

    let peek = storage.receive_messages(&bob, false, 10).await.unwrap();
    assert_eq!(peek.len(), 3);
    assert!(peek.iter().all(|m| !m.read));

    let first = storage.receive_messages(&bob, true, 2).await.unwrap();
    let texts: Vec<_> = first.iter().map(|m| m.message.text()).collect();
    assert_eq!(texts, vec!["one", "two"]);
    assert!(first.iter().all(|m| m.read));

    let rest = storage.receive_messages(&bob, true, 10).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].message.text(), "three");
    assert!(storage.receive_messages(&bob, true, 10).await.unwrap().is_empty());

    let all = storage.get_all_messages(&bob).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|m| m.read));
}

#[tokio::test]
#[ignore]
async fn test_concurrent_receivers_never_share_a_message() {
    let storage = Arc::new(setup(RedisConfig::default()).await);
    let bob = AgentId::from("bob");

    for i in 0..20 {
        let msg = InternalMessage::new(None, bob.clone(), Message::agent_text(format!("m{i}")));
        storage.send_message(msg).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let storage = Arc::clone(&storage);
        let bob = bob.clone();
        handles.push(tokio::spawn(async move {
            let mut got = Vec::new();
            loop {
                let batch = storage.receive_messages(&bob, true, 3).await.unwrap();
                if batch.is_empty() {
                    let pending = storage.receive_messages(&bob, false, 1).await.unwrap();
                    if pending.is_empty() {
                        break;
                    }
                    continue;
                }
                got.extend(batch.into_iter().map(|m| m.id));
            }
            got
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 20);
    assert_eq!(all.len(), 20);
}

/// Plain connection to the same server, for inspecting raw keys.
async fn raw_conn(storage: &RedisStorage) -> redis::aio::MultiplexedConnection {
    redis::Client::open(storage.config().url.as_str())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_small_receive_from_long_queue() {
    let storage = setup(RedisConfig::default()).await;
    let bob = AgentId::from("bob");

    for i in 0..300 {
        let msg = InternalMessage::new(None, bob.clone(), Message::agent_text(format!("m{i}")));
        storage.send_message(msg).await.unwrap();
    }
    for _ in 0..29 {
        assert_eq!(storage.receive_messages(&bob, true, 10).await.unwrap().len(), 10);
    }

    // Claimed IDs leave the pending list; the history keeps all of them.
    let prefix = &storage.config().prefix;
    let mut conn = raw_conn(&storage).await;
    let pending: usize = redis::cmd("LLEN")
        .arg(format!("{prefix}messages:bob:pending"))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(pending, 10);

    let next = storage.receive_messages(&bob, true, 1).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].message.text(), "m290");
    assert_eq!(storage.get_all_messages(&bob).await.unwrap().len(), 300);
}

#[tokio::test]
#[ignore]
async fn test_receive_skips_expired_messages_and_keeps_ttl() {
    let storage = setup(RedisConfig::default().with_message_ttl(60)).await;
    let bob = AgentId::from("bob");

    let mut sent = Vec::new();
    for text in ["gone", "kept", "later"] {
        let msg = InternalMessage::new(None, bob.clone(), Message::agent_text(text));
        sent.push(storage.send_message(msg).await.unwrap());
    }

    let prefix = storage.config().prefix.clone();
    let mut conn = raw_conn(&storage).await;
    let (): () = redis::cmd("DEL")
        .arg(format!("{prefix}message:{}", sent[0].id))
        .query_async(&mut conn)
        .await
        .unwrap();

    let got = storage.receive_messages(&bob, true, 1).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message.text(), "kept");

    let ttl: i64 = redis::cmd("TTL")
        .arg(format!("{prefix}message:{}", sent[1].id))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(ttl > 0 && ttl <= 60);

    let gone: bool = redis::cmd("EXISTS")
        .arg(format!("{prefix}message:{}", sent[0].id))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!gone);
}

#[tokio::test]
#[ignore]
async fn test_task_pagination_and_filters() {
    let storage = setup(RedisConfig::default()).await;
    let ctx = ContextId::from("trip");

    let mut ids = Vec::new();
    for _ in 0..5 {
        let task = storage
            .create_task(Task::new(Some(ctx.clone())))
            .await
            .unwrap();
        ids.push(task.id);
    }
    storage
        .create_task(Task::new(Some(ContextId::from("other"))))
        .await
        .unwrap();

    let filter = TaskFilter::default().with_context(ctx.clone()).page(2, 0);
    let page = storage.list_tasks(&filter).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(
        page.tasks.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
        ids[..2].to_vec()
    );
    assert!(page.has_more(&filter));

    let last = TaskFilter::default().with_context(ctx.clone()).page(2, 4);
    let page = storage.list_tasks(&last).await.unwrap();
    assert_eq!(page.tasks.len(), 1);
    assert!(!page.has_more(&last));

    let mut task = storage.get_task(&ids[0]).await.unwrap().unwrap();
    task.status = TaskStatus::new(TaskState::Working);
    storage.update_task(task).await.unwrap();

    let working = TaskFilter::default()
        .with_context(ctx)
        .with_status(TaskState::Working);
    let page = storage.list_tasks(&working).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.tasks[0].id, ids[0]);

    let submitted = TaskFilter::default().with_status(TaskState::Submitted);
    assert_eq!(storage.list_tasks(&submitted).await.unwrap().total, 5);

    assert!(storage.delete_task(&ids[1]).await.unwrap());
    assert!(!storage.delete_task(&ids[1]).await.unwrap());
    assert_eq!(storage.list_tasks(&submitted).await.unwrap().total, 4);
}

#[tokio::test]
#[ignore]
async fn test_update_missing_task_is_not_found() {
    let storage = setup(RedisConfig::default()).await;
    let err = storage.update_task(Task::new(None)).await.unwrap_err();
    assert!(matches!(err, thronglets_core::Error::NotFound { .. }));
}

#[tokio::test]
#[ignore]
async fn test_tasks_between_uses_status_time() {
    let storage = setup(RedisConfig::default()).await;
    let before = Utc::now() - chrono::Duration::seconds(1);
    let task = storage.create_task(Task::new(None)).await.unwrap();
    let after = Utc::now() + chrono::Duration::seconds(1);

    let found = storage.tasks_between(before, after).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, task.id);

    let earlier = storage
        .tasks_between(before - chrono::Duration::hours(1), before)
        .await
        .unwrap();
    assert!(earlier.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_app_name_index_follows_updates() {
    let storage = setup(RedisConfig::default()).await;

    let app = RegisteredApp::new(app_card("weather"));
    storage.register_app(app.clone()).await.unwrap();
    let found = storage.find_app_by_name("weather").await.unwrap().unwrap();
    assert_eq!(found.app_id, app.app_id);

    let mut renamed = app.clone();
    renamed.card.name = "forecast".to_string();
    renamed.healthy = false;
    storage.update_app(renamed).await.unwrap();

    assert!(storage.find_app_by_name("weather").await.unwrap().is_none());
    assert!(storage.find_app_by_name("forecast").await.unwrap().is_some());
    assert_eq!(storage.list_apps(false).await.unwrap().len(), 1);
    assert!(storage.list_apps(true).await.unwrap().is_empty());

    assert!(storage.delete_app(&app.app_id).await.unwrap());
    assert!(storage.find_app_by_name("forecast").await.unwrap().is_none());
}
