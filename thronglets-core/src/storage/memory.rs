//! In-memory Storage implementation.
//!
//! Everything lives in process memory and is lost on restart. Nothing expires.
//! All state sits behind one lock so each operation, including a marking
//! receive, is atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Storage, TaskFilter, TaskPage};
use crate::error::{Error, Result};
use crate::types::{AgentId, AppId, InternalMessage, RegisteredAgent, RegisteredApp, Task, TaskId};

#[derive(Default)]
struct State {
    agents: HashMap<AgentId, RegisteredAgent>,
    apps: HashMap<AppId, RegisteredApp>,
    tasks: HashMap<TaskId, Task>,
    /// Task IDs in creation order
    task_order: Vec<TaskId>,
    /// Per-recipient queues in send order
    messages: HashMap<AgentId, Vec<InternalMessage>>,
}

/// Volatile, process-local storage backend.
pub struct InMemoryStorage {
    state: RwLock<State>,
    connected: AtomicBool,
}

impl InMemoryStorage {
    /// Create an empty store. It is connected immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            connected: AtomicBool::new(true),
        }
    }

    /// Number of stored tasks.
    pub async fn task_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn register_agent(&self, agent: RegisteredAgent) -> Result<RegisteredAgent> {
        let mut state = self.state.write().await;
        state.agents.insert(agent.agent_id.clone(), agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<RegisteredAgent>> {
        Ok(self.state.read().await.agents.get(agent_id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<RegisteredAgent>> {
        let state = self.state.read().await;
        let mut agents: Vec<_> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(agents)
    }

    async fn delete_agent(&self, agent_id: &AgentId) -> Result<bool> {
        Ok(self.state.write().await.agents.remove(agent_id).is_some())
    }

    async fn touch_agent(&self, agent_id: &AgentId) -> Result<Option<RegisteredAgent>> {
        let mut state = self.state.write().await;
        Ok(state.agents.get_mut(agent_id).map(|agent| {
            agent.mark_seen();
            agent.clone()
        }))
    }

    async fn create_task(&self, task: Task) -> Result<Task> {
        let mut state = self.state.write().await;
        if state.tasks.insert(task.id.clone(), task.clone()).is_none() {
            state.task_order.push(task.id.clone());
        }
        Ok(task)
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        Ok(self.state.read().await.tasks.get(task_id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskPage> {
        let state = self.state.read().await;
        let matches: Vec<Task> = state
            .task_order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        Ok(TaskPage::from_matches(matches, filter))
    }

    async fn update_task(&self, task: Task) -> Result<Task> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(task)
            }
            None => Err(Error::task_not_found(&task.id)),
        }
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.tasks.remove(task_id).is_some();
        if removed {
            state.task_order.retain(|id| id != task_id);
        }
        Ok(removed)
    }

    async fn send_message(&self, message: InternalMessage) -> Result<InternalMessage> {
        let mut state = self.state.write().await;
        state
            .messages
            .entry(message.to_agent_id.clone())
            .or_default()
            .push(message.clone());
        debug!(message_id = %message.id, to = %message.to_agent_id, "Queued message");
        Ok(message)
    }

    async fn receive_messages(
        &self,
        agent_id: &AgentId,
        mark_as_read: bool,
        limit: usize,
    ) -> Result<Vec<InternalMessage>> {
        if !mark_as_read {
            let state = self.state.read().await;
            return Ok(state
                .messages
                .get(agent_id)
                .map(|queue| {
                    queue
                        .iter()
                        .filter(|m| !m.read)
                        .take(limit)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default());
        }

        let mut state = self.state.write().await;
        let Some(queue) = state.messages.get_mut(agent_id) else {
            return Ok(Vec::new());
        };
        Ok(queue
            .iter_mut()
            .filter(|m| !m.read)
            .take(limit)
            .map(|m| {
                m.read = true;
                m.clone()
            })
            .collect())
    }

    async fn get_all_messages(&self, agent_id: &AgentId) -> Result<Vec<InternalMessage>> {
        let state = self.state.read().await;
        Ok(state.messages.get(agent_id).cloned().unwrap_or_default())
    }

    async fn register_app(&self, app: RegisteredApp) -> Result<RegisteredApp> {
        let mut state = self.state.write().await;
        state.apps.insert(app.app_id.clone(), app.clone());
        Ok(app)
    }

    async fn get_app(&self, app_id: &AppId) -> Result<Option<RegisteredApp>> {
        Ok(self.state.read().await.apps.get(app_id).cloned())
    }

    async fn list_apps(&self, healthy_only: bool) -> Result<Vec<RegisteredApp>> {
        let state = self.state.read().await;
        let mut apps: Vec<_> = state
            .apps
            .values()
            .filter(|app| !healthy_only || app.healthy)
            .cloned()
            .collect();
        apps.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.app_id.cmp(&b.app_id))
        });
        Ok(apps)
    }

    async fn update_app(&self, app: RegisteredApp) -> Result<RegisteredApp> {
        let mut state = self.state.write().await;
        match state.apps.get_mut(&app.app_id) {
            Some(existing) => {
                *existing = app.clone();
                Ok(app)
            }
            None => Err(Error::app_not_found(&app.app_id)),
        }
    }

    async fn delete_app(&self, app_id: &AppId) -> Result<bool> {
        Ok(self.state.write().await.apps.remove(app_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentCard, AppCard, ContextId, Message, TaskState};
    use std::sync::Arc;

    fn app_card(name: &str) -> AppCard {
        AppCard {
            name: name.to_string(),
            description: "test app".to_string(),
            scenario: "testing".to_string(),
            mcp_endpoint: "http://localhost:1/mcp".to_string(),
            health_check_url: "http://localhost:1/health".to_string(),
            icon_url: None,
            tags: Vec::new(),
        }
    }

    fn queued(to: &str, text: &str) -> InternalMessage {
        InternalMessage::new(None, AgentId::from(to), Message::agent_text(text))
    }

    #[tokio::test]
    async fn starts_connected_and_survives_disconnect() {
        let storage = InMemoryStorage::new();
        assert!(storage.is_connected().await);

        storage.disconnect().await.unwrap();
        assert!(!storage.is_connected().await);
        assert!(storage.list_agents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn agent_crud() {
        let storage = InMemoryStorage::new();
        let agent = storage
            .register_agent(RegisteredAgent::new(AgentCard::new("alice", "a", "1")))
            .await
            .unwrap();

        let fetched = storage.get_agent(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(fetched, agent);
        assert_eq!(storage.list_agents().await.unwrap().len(), 1);

        assert!(storage.delete_agent(&agent.agent_id).await.unwrap());
        assert!(!storage.delete_agent(&agent.agent_id).await.unwrap());
        assert!(storage.get_agent(&agent.agent_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn touch_agent_advances_last_seen() {
        let storage = InMemoryStorage::new();
        let agent = storage
            .register_agent(RegisteredAgent::new(AgentCard::new("alice", "a", "1")))
            .await
            .unwrap();

        let touched = storage.touch_agent(&agent.agent_id).await.unwrap().unwrap();
        assert!(touched.last_seen_at > agent.last_seen_at);
        assert!(storage.touch_agent(&AgentId::from("ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_agent_by_name_and_version() {
        let storage = InMemoryStorage::new();
        storage
            .register_agent(RegisteredAgent::new(AgentCard::new("alice", "a", "1")))
            .await
            .unwrap();

        assert!(storage.find_agent_by_name("alice", None).await.unwrap().is_some());
        assert!(storage.find_agent_by_name("alice", Some("1")).await.unwrap().is_some());
        assert!(storage.find_agent_by_name("alice", Some("2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_task_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage.update_task(Task::new(None)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_tasks_keeps_creation_order_and_filters() {
        let storage = InMemoryStorage::new();
        let ctx = ContextId::from("ctx");
        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = storage.create_task(Task::new(Some(ctx.clone()))).await.unwrap();
            ids.push(task.id);
        }
        storage.create_task(Task::new(None)).await.unwrap();

        let page = storage
            .list_tasks(&TaskFilter::default().with_context(ctx))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        let listed: Vec<_> = page.tasks.into_iter().map(|t| t.id).collect();
        assert_eq!(listed, ids);

        let working = storage
            .list_tasks(&TaskFilter::default().with_status(TaskState::Working))
            .await
            .unwrap();
        assert_eq!(working.total, 0);
    }

    #[tokio::test]
    async fn delete_task_removes_from_listing() {
        let storage = InMemoryStorage::new();
        let task = storage.create_task(Task::new(None)).await.unwrap();
        assert!(storage.delete_task(&task.id).await.unwrap());
        assert_eq!(storage.list_tasks(&TaskFilter::default()).await.unwrap().total, 0);
        assert_eq!(storage.task_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_task_leaves_terminal_tasks_alone() {
        let storage = InMemoryStorage::new();
        let mut task = Task::new(None);
        task.status.state = TaskState::Completed;
        let task = storage.create_task(task).await.unwrap();

        let cancelled = storage.cancel_task(&task.id).await.unwrap().unwrap();
        assert_eq!(cancelled, task);

        let open = storage.create_task(Task::new(None)).await.unwrap();
        let cancelled = storage.cancel_task(&open.id).await.unwrap().unwrap();
        assert_eq!(cancelled.state(), TaskState::Cancelled);
        assert!(storage.cancel_task(&TaskId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_respects_limit_and_order() {
        let storage = InMemoryStorage::new();
        for text in ["one", "two", "three"] {
            storage.send_message(queued("bob", text)).await.unwrap();
        }

        let peeked = storage
            .receive_messages(&AgentId::from("bob"), false, 10)
            .await
            .unwrap();
        assert_eq!(peeked.len(), 3);
        assert!(peeked.iter().all(|m| !m.read));

        let first = storage
            .receive_messages(&AgentId::from("bob"), true, 2)
            .await
            .unwrap();
        let texts: Vec<_> = first.iter().map(|m| m.message.text()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(first.iter().all(|m| m.read));

        let rest = storage
            .receive_messages(&AgentId::from("bob"), true, 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].message.text(), "three");

        let all = storage.get_all_messages(&AgentId::from("bob")).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|m| m.read));
    }

    #[tokio::test]
    async fn concurrent_receives_never_share_a_message() {
        let storage = Arc::new(InMemoryStorage::new());
        for i in 0..50 {
            storage
                .send_message(queued("bob", &format!("m{i}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..5 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage
                    .receive_messages(&AgentId::from("bob"), true, 7)
                    .await
                    .unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for msg in handle.await.unwrap() {
                assert!(seen.insert(msg.id), "message delivered twice");
            }
        }
        assert_eq!(seen.len(), 35);
    }

    #[tokio::test]
    async fn list_apps_filters_unhealthy() {
        let storage = InMemoryStorage::new();
        storage
            .register_app(RegisteredApp::new(app_card("good")))
            .await
            .unwrap();
        let mut bad = RegisteredApp::new(app_card("bad"));
        bad.healthy = false;
        storage.register_app(bad).await.unwrap();

        assert_eq!(storage.list_apps(false).await.unwrap().len(), 2);
        let healthy = storage.list_apps(true).await.unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].card.name, "good");

        assert!(storage.find_app_by_name("bad").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_missing_app_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage
            .update_app(RegisteredApp::new(app_card("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
