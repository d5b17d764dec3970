//! Storage abstraction shared by every backend.
//!
//! - [`Storage`] - capability interface used by registries, router and coordinator
//! - [`InMemoryStorage`] - volatile, process-local backend
//!
//! The networked backend lives in the `thronglets-redis` crate.

mod memory;

pub use memory::InMemoryStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{
    AgentId, AppId, ContextId, InternalMessage, RegisteredAgent, RegisteredApp, Task, TaskId,
    TaskState, TaskStatus,
};

/// Default page size for task listings.
pub const DEFAULT_TASK_LIMIT: usize = 50;

/// Filter and pagination for task listings. Filters are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub context_id: Option<ContextId>,
    #[serde(default)]
    pub status: Option<TaskState>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_TASK_LIMIT
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            context_id: None,
            status: None,
            limit: DEFAULT_TASK_LIMIT,
            offset: 0,
        }
    }
}

impl TaskFilter {
    #[must_use]
    pub fn with_context(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: TaskState) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.context_id
            .as_ref()
            .is_none_or(|ctx| &task.context_id == ctx)
            && self.status.is_none_or(|st| task.status.state == st)
    }
}

/// One page of a task listing plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: usize,
}

impl TaskPage {
    /// Slice an ordered list of matches into a page.
    pub fn from_matches(matches: Vec<Task>, filter: &TaskFilter) -> Self {
        let total = matches.len();
        let tasks = matches
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();
        Self { tasks, total }
    }

    /// Whether more matches exist beyond this page.
    pub fn has_more(&self, filter: &TaskFilter) -> bool {
        filter.offset + self.tasks.len() < self.total
    }
}

/// Persistence for agents, apps, tasks and message queues.
///
/// Every operation is individually atomic. Sequences of operations are not.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name for logs and system info.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    // ---- agents ----

    /// Insert or replace an agent keyed by its ID.
    async fn register_agent(&self, agent: RegisteredAgent) -> Result<RegisteredAgent>;

    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<RegisteredAgent>>;

    async fn list_agents(&self) -> Result<Vec<RegisteredAgent>>;

    /// Returns whether an agent was removed.
    async fn delete_agent(&self, agent_id: &AgentId) -> Result<bool>;

    /// Refresh `last_seen_at` (and any expiry) for an existing agent.
    async fn touch_agent(&self, agent_id: &AgentId) -> Result<Option<RegisteredAgent>> {
        let Some(mut agent) = self.get_agent(agent_id).await? else {
            return Ok(None);
        };
        agent.mark_seen();
        self.register_agent(agent).await.map(Some)
    }

    /// Find an agent by card name, optionally matching the version too.
    async fn find_agent_by_name(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<RegisteredAgent>> {
        let agents = self.list_agents().await?;
        Ok(agents.into_iter().find(|a| {
            a.card.name == name && version.is_none_or(|v| a.card.version == v)
        }))
    }

    // ---- tasks ----

    async fn create_task(&self, task: Task) -> Result<Task>;

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>>;

    /// Matching tasks in creation order, paged by `limit` and `offset`.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskPage>;

    /// Replace an existing task. Fails with `NotFound` when it does not exist.
    async fn update_task(&self, task: Task) -> Result<Task>;

    async fn delete_task(&self, task_id: &TaskId) -> Result<bool>;

    /// Move a task to `cancelled`. Terminal tasks are returned unchanged.
    async fn cancel_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(None);
        };
        if task.is_terminal() {
            return Ok(Some(task));
        }
        task.status = TaskStatus::new(TaskState::Cancelled);
        self.update_task(task).await.map(Some)
    }

    // ---- messages ----

    /// Append a message to its recipient's queue.
    async fn send_message(&self, message: InternalMessage) -> Result<InternalMessage>;

    /// Up to `limit` unread messages in send order.
    ///
    /// With `mark_as_read`, the returned messages are marked read before this
    /// returns, and a message is never returned by two marking calls.
    async fn receive_messages(
        &self,
        agent_id: &AgentId,
        mark_as_read: bool,
        limit: usize,
    ) -> Result<Vec<InternalMessage>>;

    /// Every message ever queued for an agent, read or not.
    async fn get_all_messages(&self, agent_id: &AgentId) -> Result<Vec<InternalMessage>>;

    // ---- apps ----

    async fn register_app(&self, app: RegisteredApp) -> Result<RegisteredApp>;

    async fn get_app(&self, app_id: &AppId) -> Result<Option<RegisteredApp>>;

    async fn list_apps(&self, healthy_only: bool) -> Result<Vec<RegisteredApp>>;

    /// Replace an existing app. Fails with `NotFound` when it does not exist.
    async fn update_app(&self, app: RegisteredApp) -> Result<RegisteredApp>;

    async fn delete_app(&self, app_id: &AppId) -> Result<bool>;

    async fn find_app_by_name(&self, name: &str) -> Result<Option<RegisteredApp>> {
        let apps = self.list_apps(false).await?;
        Ok(apps.into_iter().find(|a| a.card.name == name))
    }
}

/// Reject an empty page size.
pub fn validate_limit(limit: usize) -> Result<usize> {
    if limit == 0 {
        return Err(Error::Validation("limit must be at least 1".into()));
    }
    Ok(limit)
}
