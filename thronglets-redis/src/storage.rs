//! Redis-backed [`Storage`] implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, IntoConnectionInfo, Pipeline, RedisError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use thronglets_core::{
    AgentId, AppId, Error, InternalMessage, RegisteredAgent, RegisteredApp, Result, Storage, Task,
    TaskFilter, TaskId, TaskPage,
};

use crate::config::RedisConfig;
use crate::keys::Keys;

/// Networked storage backend on Redis.
///
/// Each entity is stored as a JSON string under its own key, with sets and a
/// sorted set as secondary indexes. Multi-key writes run in `MULTI`/`EXEC`
/// pipelines. Index entries whose data key expired are pruned lazily on read.
pub struct RedisStorage {
    config: RedisConfig,
    keys: Keys,
    conn: RwLock<Option<ConnectionManager>>,
}

fn unavailable(err: RedisError) -> Error {
    Error::BackendUnavailable(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

/// Queue a `SET`, with an expiry when `ttl_secs` is non-zero.
fn put(pipe: &mut Pipeline, key: &str, value: String, ttl_secs: u64) {
    if ttl_secs > 0 {
        pipe.set_ex(key, value, ttl_secs).ignore();
    } else {
        pipe.set(key, value).ignore();
    }
}

/// `SET` that only overwrites an existing key and keeps its expiry, so a
/// key that expired in the meantime is not brought back without a TTL.
fn rewrite_cmd(key: &str, value: String) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value).arg("XX").arg("KEEPTTL");
    cmd
}

fn expire_secs(ttl_secs: u64) -> i64 {
    i64::try_from(ttl_secs).unwrap_or(i64::MAX)
}

fn time_score(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Values that were found, and the IDs whose data key has gone.
struct Loaded<T> {
    found: Vec<T>,
    stale: Vec<String>,
}

impl RedisStorage {
    /// Create a disconnected backend. Call [`Storage::connect`] before use.
    pub fn new(config: RedisConfig) -> Self {
        Self {
            keys: Keys::new(config.prefix.clone()),
            config,
            conn: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        self.conn.read().await.clone().ok_or(Error::NotConnected)
    }

    async fn load<T: DeserializeOwned>(
        conn: &mut ConnectionManager,
        key: &str,
    ) -> Result<Option<T>> {
        let raw: Option<String> = conn.get(key).await.map_err(unavailable)?;
        raw.as_deref().map(decode).transpose()
    }

    /// `MGET` the data keys for `ids`, keeping their order.
    async fn load_many<T: DeserializeOwned>(
        conn: &mut ConnectionManager,
        ids: Vec<String>,
        key: impl Fn(&str) -> String,
    ) -> Result<Loaded<T>> {
        let mut loaded = Loaded {
            found: Vec::with_capacity(ids.len()),
            stale: Vec::new(),
        };
        if ids.is_empty() {
            return Ok(loaded);
        }

        let keys: Vec<String> = ids.iter().map(|id| key(id.as_str())).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(conn)
            .await
            .map_err(unavailable)?;

        for (id, value) in ids.into_iter().zip(raw) {
            match value {
                Some(value) => loaded.found.push(decode(&value)?),
                None => loaded.stale.push(id),
            }
        }
        Ok(loaded)
    }

    /// Drop expired IDs from plain set indexes.
    async fn prune_sets(
        conn: &mut ConnectionManager,
        sets: &[String],
        stale: &[String],
    ) -> Result<()> {
        if stale.is_empty() {
            return Ok(());
        }
        debug!(count = stale.len(), "Pruning expired index entries");
        let mut pipe = redis::pipe();
        for set in sets {
            pipe.srem(set, stale).ignore();
        }
        let (): () = pipe.query_async(conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn prune_tasks(
        &self,
        conn: &mut ConnectionManager,
        extra_sets: &[String],
        stale: &[String],
    ) -> Result<()> {
        if stale.is_empty() {
            return Ok(());
        }
        let mut sets = vec![self.keys.tasks()];
        sets.extend_from_slice(extra_sets);
        Self::prune_sets(conn, &sets, stale).await?;
        let _: i64 = conn
            .zrem(self.keys.tasks_by_time(), stale)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    /// Load a recipient's messages in queue order, dropping expired ones
    /// from the queue, the pending list and the unread set.
    async fn load_queue(
        &self,
        conn: &mut ConnectionManager,
        agent_id: &AgentId,
        ids: Vec<String>,
    ) -> Result<Vec<InternalMessage>> {
        let loaded: Loaded<InternalMessage> =
            Self::load_many(conn, ids, |id| self.keys.message(id)).await?;
        if !loaded.stale.is_empty() {
            let queue = self.keys.queue(agent_id);
            let pending = self.keys.pending(agent_id);
            let mut pipe = redis::pipe();
            pipe.srem(self.keys.unread(agent_id), &loaded.stale).ignore();
            for id in &loaded.stale {
                pipe.lrem(&queue, 0, id).ignore().lrem(&pending, 0, id).ignore();
            }
            let (): () = pipe.query_async(conn).await.map_err(unavailable)?;
        }
        Ok(loaded.found)
    }

    /// Tasks whose latest status timestamp falls within `[from, to]`, oldest first.
    #[instrument(name = "redis::tasks_between", skip(self))]
    pub async fn tasks_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrangebyscore(self.keys.tasks_by_time(), time_score(from), time_score(to))
            .await
            .map_err(unavailable)?;
        let loaded: Loaded<Task> =
            Self::load_many(&mut conn, ids, |id| self.keys.task(id)).await?;
        self.prune_tasks(&mut conn, &[], &loaded.stale).await?;
        Ok(loaded.found)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let mut info = self
            .config
            .url
            .as_str()
            .into_connection_info()
            .map_err(unavailable)?;
        info.redis.db = self.config.db;

        let client = Client::open(info).map_err(unavailable)?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(self.config.socket_timeout)
            .set_response_timeout(self.config.socket_timeout);
        let mut manager = client
            .get_connection_manager_with_config(manager_config)
            .await
            .map_err(unavailable)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(unavailable)?;

        *self.conn.write().await = Some(manager);
        info!(
            url = %self.config.redacted_url(),
            db = self.config.db,
            prefix = %self.config.prefix,
            "Connected to Redis"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.conn.write().await.take().is_some() {
            info!("Disconnected from Redis");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let Ok(mut conn) = self.conn().await else {
            return false;
        };
        let ping: std::result::Result<String, RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        match ping {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Redis ping failed");
                false
            }
        }
    }

    // ---- agents ----

    async fn register_agent(&self, agent: RegisteredAgent) -> Result<RegisteredAgent> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        put(
            &mut pipe,
            &self.keys.agent(&agent.agent_id),
            encode(&agent)?,
            self.config.agent_ttl_secs,
        );
        pipe.sadd(self.keys.agents(), agent.agent_id.as_str()).ignore();
        let (): () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(agent)
    }

    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<RegisteredAgent>> {
        let mut conn = self.conn().await?;
        Self::load(&mut conn, &self.keys.agent(agent_id)).await
    }

    async fn list_agents(&self) -> Result<Vec<RegisteredAgent>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(self.keys.agents()).await.map_err(unavailable)?;
        let loaded: Loaded<RegisteredAgent> =
            Self::load_many(&mut conn, ids, |id| self.keys.agent(id)).await?;
        Self::prune_sets(&mut conn, &[self.keys.agents()], &loaded.stale).await?;

        let mut agents = loaded.found;
        agents.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(agents)
    }

    async fn delete_agent(&self, agent_id: &AgentId) -> Result<bool> {
        let mut conn = self.conn().await?;
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.keys.agent(agent_id))
            .srem(self.keys.agents(), agent_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    // ---- tasks ----

    async fn create_task(&self, task: Task) -> Result<Task> {
        let mut conn = self.conn().await?;
        let id = task.id.as_str();
        let mut pipe = redis::pipe();
        pipe.atomic();
        put(
            &mut pipe,
            &self.keys.task(&task.id),
            encode(&task)?,
            self.config.task_ttl_secs,
        );
        pipe.sadd(self.keys.tasks(), id)
            .ignore()
            .sadd(self.keys.tasks_in_context(&task.context_id), id)
            .ignore()
            .sadd(self.keys.tasks_in_state(task.state()), id)
            .ignore()
            .zadd(self.keys.tasks_by_time(), id, time_score(task.status.timestamp))
            .ignore();
        let (): () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(task)
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let mut conn = self.conn().await?;
        Self::load(&mut conn, &self.keys.task(task_id)).await
    }

    #[instrument(name = "redis::list_tasks", skip(self))]
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskPage> {
        let mut conn = self.conn().await?;

        let mut sets = Vec::new();
        if let Some(context_id) = &filter.context_id {
            sets.push(self.keys.tasks_in_context(context_id));
        }
        if let Some(state) = filter.status {
            sets.push(self.keys.tasks_in_state(state));
        }

        let mut ids: Vec<String> = match sets.as_slice() {
            [] => conn.smembers(self.keys.tasks()).await,
            [single] => conn.smembers(single).await,
            _ => conn.sinter(&sets).await,
        }
        .map_err(unavailable)?;
        // Time-ordered IDs, so lexical order is creation order.
        ids.sort();

        let loaded: Loaded<Task> =
            Self::load_many(&mut conn, ids, |id| self.keys.task(id)).await?;
        self.prune_tasks(&mut conn, &sets, &loaded.stale).await?;

        let matches = loaded
            .found
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect();
        Ok(TaskPage::from_matches(matches, filter))
    }

    async fn update_task(&self, task: Task) -> Result<Task> {
        let mut conn = self.conn().await?;
        let key = self.keys.task(&task.id);
        let Some(old) = Self::load::<Task>(&mut conn, &key).await? else {
            return Err(Error::task_not_found(&task.id));
        };

        let id = task.id.as_str();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if old.context_id != task.context_id {
            pipe.srem(self.keys.tasks_in_context(&old.context_id), id)
                .ignore()
                .sadd(self.keys.tasks_in_context(&task.context_id), id)
                .ignore();
        }
        if old.state() != task.state() {
            pipe.srem(self.keys.tasks_in_state(old.state()), id)
                .ignore()
                .sadd(self.keys.tasks_in_state(task.state()), id)
                .ignore();
        }
        put(&mut pipe, &key, encode(&task)?, self.config.task_ttl_secs);
        pipe.sadd(self.keys.tasks(), id)
            .ignore()
            .zadd(self.keys.tasks_by_time(), id, time_score(task.status.timestamp))
            .ignore();
        let (): () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(task)
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<bool> {
        let mut conn = self.conn().await?;
        let key = self.keys.task(task_id);
        let Some(old) = Self::load::<Task>(&mut conn, &key).await? else {
            return Ok(false);
        };

        let id = task_id.as_str();
        let (): () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .srem(self.keys.tasks(), id)
            .ignore()
            .srem(self.keys.tasks_in_context(&old.context_id), id)
            .ignore()
            .srem(self.keys.tasks_in_state(old.state()), id)
            .ignore()
            .zrem(self.keys.tasks_by_time(), id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(true)
    }

    // ---- messages ----

    async fn send_message(&self, message: InternalMessage) -> Result<InternalMessage> {
        let mut conn = self.conn().await?;
        let ttl = self.config.message_ttl_secs;
        let queue = self.keys.queue(&message.to_agent_id);
        let unread = self.keys.unread(&message.to_agent_id);
        let pending = self.keys.pending(&message.to_agent_id);
        let id = message.id.as_str();

        let mut pipe = redis::pipe();
        pipe.atomic();
        put(&mut pipe, &self.keys.message(&message.id), encode(&message)?, ttl);
        pipe.rpush(&queue, id)
            .ignore()
            .rpush(&pending, id)
            .ignore()
            .sadd(&unread, id)
            .ignore();
        if ttl > 0 {
            for key in [&queue, &pending, &unread] {
                pipe.expire(key, expire_secs(ttl)).ignore();
            }
        }
        let (): () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(message)
    }

    #[instrument(name = "redis::receive_messages", skip(self, agent_id), fields(agent_id = %agent_id))]
    async fn receive_messages(
        &self,
        agent_id: &AgentId,
        mark_as_read: bool,
        limit: usize,
    ) -> Result<Vec<InternalMessage>> {
        let mut conn = self.conn().await?;
        let unread_key = self.keys.unread(agent_id);
        let pending_key = self.keys.pending(agent_id);

        // Walk the pending list one window at a time so the cost follows
        // `limit` rather than the queue length. Expired IDs are pruned from
        // the list as they are met, so the next window starts after the
        // messages kept so far.
        let mut batch: Vec<InternalMessage> = Vec::with_capacity(limit);
        while batch.len() < limit {
            let want = limit - batch.len();
            let start = isize::try_from(batch.len()).unwrap_or(isize::MAX);
            let stop = start.saturating_add(isize::try_from(want).unwrap_or(isize::MAX) - 1);
            let ids: Vec<String> = conn
                .lrange(&pending_key, start, stop)
                .await
                .map_err(unavailable)?;
            let fetched = ids.len();
            if fetched == 0 {
                break;
            }
            batch.extend(self.load_queue(&mut conn, agent_id, ids).await?);
            if fetched < want {
                break;
            }
        }
        if !mark_as_read || batch.is_empty() {
            return Ok(batch);
        }

        // SREM decides ownership: a concurrent receiver that loaded the same
        // IDs gets 0 back and drops them.
        let mut pipe = redis::pipe();
        pipe.atomic();
        for message in &batch {
            let mut read = message.clone();
            read.read = true;
            pipe.srem(&unread_key, message.id.as_str());
            pipe.lrem(&pending_key, 1, message.id.as_str()).ignore();
            pipe.add_command(rewrite_cmd(&self.keys.message(&message.id), encode(&read)?))
                .ignore();
        }
        let removed: Vec<i64> = pipe.query_async(&mut conn).await.map_err(unavailable)?;

        let claimed: Vec<InternalMessage> = batch
            .into_iter()
            .zip(removed)
            .filter(|(_, removed)| *removed == 1)
            .map(|(mut message, _)| {
                message.read = true;
                message
            })
            .collect();
        debug!(count = claimed.len(), "Claimed messages");
        Ok(claimed)
    }

    async fn get_all_messages(&self, agent_id: &AgentId) -> Result<Vec<InternalMessage>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .lrange(self.keys.queue(agent_id), 0, -1)
            .await
            .map_err(unavailable)?;
        self.load_queue(&mut conn, agent_id, ids).await
    }

    // ---- apps ----

    async fn register_app(&self, app: RegisteredApp) -> Result<RegisteredApp> {
        let mut conn = self.conn().await?;
        let id = app.app_id.as_str();
        let mut pipe = redis::pipe();
        pipe.atomic();
        put(
            &mut pipe,
            &self.keys.app(&app.app_id),
            encode(&app)?,
            self.config.app_ttl_secs,
        );
        pipe.sadd(self.keys.apps(), id)
            .ignore()
            .hset(self.keys.apps_by_name(), &app.card.name, id)
            .ignore();
        let (): () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(app)
    }

    async fn get_app(&self, app_id: &AppId) -> Result<Option<RegisteredApp>> {
        let mut conn = self.conn().await?;
        Self::load(&mut conn, &self.keys.app(app_id)).await
    }

    async fn list_apps(&self, healthy_only: bool) -> Result<Vec<RegisteredApp>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(self.keys.apps()).await.map_err(unavailable)?;
        let loaded: Loaded<RegisteredApp> =
            Self::load_many(&mut conn, ids, |id| self.keys.app(id)).await?;
        Self::prune_sets(&mut conn, &[self.keys.apps()], &loaded.stale).await?;

        let mut apps: Vec<_> = loaded
            .found
            .into_iter()
            .filter(|app| !healthy_only || app.healthy)
            .collect();
        apps.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.app_id.cmp(&b.app_id))
        });
        Ok(apps)
    }

    async fn update_app(&self, app: RegisteredApp) -> Result<RegisteredApp> {
        let mut conn = self.conn().await?;
        let key = self.keys.app(&app.app_id);
        let Some(old) = Self::load::<RegisteredApp>(&mut conn, &key).await? else {
            return Err(Error::app_not_found(&app.app_id));
        };

        let id = app.app_id.as_str();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if old.card.name != app.card.name {
            pipe.hdel(self.keys.apps_by_name(), &old.card.name).ignore();
        }
        put(&mut pipe, &key, encode(&app)?, self.config.app_ttl_secs);
        pipe.sadd(self.keys.apps(), id)
            .ignore()
            .hset(self.keys.apps_by_name(), &app.card.name, id)
            .ignore();
        let (): () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(app)
    }

    async fn delete_app(&self, app_id: &AppId) -> Result<bool> {
        let mut conn = self.conn().await?;
        let key = self.keys.app(app_id);
        let Some(old) = Self::load::<RegisteredApp>(&mut conn, &key).await? else {
            return Ok(false);
        };

        let (): () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .srem(self.keys.apps(), app_id.as_str())
            .ignore()
            .hdel(self.keys.apps_by_name(), &old.card.name)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(true)
    }

    async fn find_app_by_name(&self, name: &str) -> Result<Option<RegisteredApp>> {
        let mut conn = self.conn().await?;
        let by_name = self.keys.apps_by_name();

        let indexed: Option<String> = conn.hget(&by_name, name).await.map_err(unavailable)?;
        if let Some(id) = indexed
            && let Some(app) = Self::load::<RegisteredApp>(&mut conn, &self.keys.app(&id)).await?
            && app.card.name == name
        {
            return Ok(Some(app));
        }

        // Name index missing or stale: scan and repair.
        let found = self
            .list_apps(false)
            .await?
            .into_iter()
            .find(|app| app.card.name == name);
        match &found {
            Some(app) => {
                let _: i64 = conn
                    .hset(&by_name, name, app.app_id.as_str())
                    .await
                    .map_err(unavailable)?;
            }
            None => {
                let _: i64 = conn.hdel(&by_name, name).await.map_err(unavailable)?;
            }
        }
        Ok(found)
    }
}
