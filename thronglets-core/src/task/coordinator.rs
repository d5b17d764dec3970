//! Task state machine on top of storage.
//!
//! ```text
//! submitted ──► working ──► input_required / auth_required ──► ...
//!     │            │
//!     └────────────┴──► completed | failed | cancelled | rejected   (terminal)
//! ```
//!
//! Transitions between non-terminal states are unrestricted unless a
//! [`TransitionPolicy`] says otherwise. Terminal states are final.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::storage::{Storage, TaskFilter, TaskPage, validate_limit};
use crate::types::{
    AgentId, Artifact, ContextId, Message, Metadata, Task, TaskId, TaskState, TaskStatus,
};

/// Metadata key recording which agent created a task.
pub const CREATED_BY_KEY: &str = "created_by_agent";

/// Decides whether a non-terminal task may move between two states.
pub trait TransitionPolicy: Send + Sync {
    fn allows(&self, from: TaskState, to: TaskState) -> bool;
}

/// Allows every transition out of a non-terminal state.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissivePolicy;

impl TransitionPolicy for PermissivePolicy {
    fn allows(&self, _from: TaskState, _to: TaskState) -> bool {
        true
    }
}

/// Parameters for creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub context_id: Option<ContextId>,
    pub message: Option<Message>,
    pub metadata: Metadata,
    pub created_by: Option<AgentId>,
}

impl NewTask {
    #[must_use]
    pub fn in_context(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn created_by(mut self, agent_id: AgentId) -> Self {
        self.created_by = Some(agent_id);
        self
    }
}

/// Creates tasks and moves them through their lifecycle.
pub struct TaskCoordinator {
    storage: Arc<dyn Storage>,
    policy: Arc<dyn TransitionPolicy>,
}

impl TaskCoordinator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            policy: Arc::new(PermissivePolicy),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn TransitionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Create a task in the `submitted` state.
    #[instrument(name = "task::create", skip(self, new))]
    pub async fn create(&self, new: NewTask) -> Result<Task> {
        let mut task = Task::new(new.context_id);
        task.metadata = new.metadata;
        if let Some(agent_id) = new.created_by {
            task.metadata
                .insert(CREATED_BY_KEY.to_string(), agent_id.to_string().into());
        }
        if let Some(message) = new.message {
            let message = stamp(message, &task);
            task.history.push(message);
        }

        let task = self.storage.create_task(task).await?;
        info!(task_id = %task.id, context_id = %task.context_id, "Created task");
        Ok(task)
    }

    /// Fetch a task, optionally keeping only the last `history_length` messages.
    pub async fn get(&self, task_id: &TaskId, history_length: Option<usize>) -> Result<Task> {
        let mut task = self
            .storage
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))?;
        if let Some(n) = history_length {
            task.truncate_history(n);
        }
        Ok(task)
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<TaskPage> {
        validate_limit(filter.limit)?;
        self.storage.list_tasks(filter).await
    }

    /// Move a task to `state`, recording an optional status message in history.
    #[instrument(name = "task::update_status", skip(self, task_id, message), fields(task_id = %task_id))]
    pub async fn update_status(
        &self,
        task_id: &TaskId,
        state: TaskState,
        message: Option<Message>,
    ) -> Result<Task> {
        let mut task = self.get(task_id, None).await?;
        let from = task.state();
        if from.is_terminal() || !self.policy.allows(from, state) {
            return Err(Error::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to: state,
            });
        }

        let message = message.map(|m| stamp(m, &task));
        if let Some(message) = &message {
            task.history.push(message.clone());
        }
        task.status = TaskStatus {
            state,
            message,
            timestamp: Utc::now(),
        };

        let task = self.storage.update_task(task).await?;
        debug!(%from, to = %state, "Task status updated");
        Ok(task)
    }

    /// Cancel a task. Terminal tasks are returned unchanged.
    #[instrument(name = "task::cancel", skip(self, task_id), fields(task_id = %task_id))]
    pub async fn cancel(&self, task_id: &TaskId) -> Result<Task> {
        let task = self
            .storage
            .cancel_task(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))?;
        info!(state = %task.state(), "Cancel requested");
        Ok(task)
    }

    /// Attach an output to a task that is still running.
    pub async fn add_artifact(&self, task_id: &TaskId, artifact: Artifact) -> Result<Task> {
        let mut task = self.get(task_id, None).await?;
        if task.is_terminal() {
            return Err(Error::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.state(),
                to: task.state(),
            });
        }
        task.artifacts.push(artifact);
        self.storage.update_task(task).await
    }

    #[instrument(name = "task::delete", skip(self, task_id), fields(task_id = %task_id))]
    pub async fn delete(&self, task_id: &TaskId) -> Result<()> {
        if !self.storage.delete_task(task_id).await? {
            return Err(Error::task_not_found(task_id));
        }
        info!("Deleted task");
        Ok(())
    }
}

/// Tie a message to the task it is recorded against.
fn stamp(mut message: Message, task: &Task) -> Message {
    message.task_id = Some(task.id.clone());
    message.context_id.get_or_insert_with(|| task.context_id.clone());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::Part;

    fn coordinator() -> TaskCoordinator {
        TaskCoordinator::new(Arc::new(InMemoryStorage::new()))
    }

    /// Rejects submitted -> input_required.
    struct StrictPolicy;

    impl TransitionPolicy for StrictPolicy {
        fn allows(&self, from: TaskState, to: TaskState) -> bool {
            !(from == TaskState::Submitted && to == TaskState::InputRequired)
        }
    }

    #[tokio::test]
    async fn create_records_message_and_creator() {
        let coordinator = coordinator();
        let task = coordinator
            .create(
                NewTask::default()
                    .with_message(Message::user_text("plan a trip"))
                    .created_by(AgentId::from("alice")),
            )
            .await
            .unwrap();

        assert_eq!(task.state(), TaskState::Submitted);
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].task_id.as_ref(), Some(&task.id));
        assert_eq!(task.history[0].context_id.as_ref(), Some(&task.context_id));
        assert_eq!(task.metadata[CREATED_BY_KEY], "alice");
    }

    #[tokio::test]
    async fn terminal_lock() {
        let coordinator = coordinator();
        let task = coordinator.create(NewTask::default()).await.unwrap();
        coordinator
            .update_status(&task.id, TaskState::Working, None)
            .await
            .unwrap();
        let done = coordinator
            .update_status(&task.id, TaskState::Completed, Some(Message::agent_text("done")))
            .await
            .unwrap();
        assert_eq!(done.history.len(), 1);
        assert_eq!(done.status.message.as_ref().map(Message::text).as_deref(), Some("done"));

        let err = coordinator
            .update_status(&task.id, TaskState::Working, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: TaskState::Completed,
                to: TaskState::Working,
                ..
            }
        ));

        let cancelled = coordinator.cancel(&task.id).await.unwrap();
        assert_eq!(cancelled, done);
    }

    #[tokio::test]
    async fn non_terminal_transitions_are_permissive() {
        let coordinator = coordinator();
        let task = coordinator.create(NewTask::default()).await.unwrap();
        for state in [
            TaskState::InputRequired,
            TaskState::Submitted,
            TaskState::AuthRequired,
            TaskState::Working,
        ] {
            let updated = coordinator.update_status(&task.id, state, None).await.unwrap();
            assert_eq!(updated.state(), state);
        }
    }

    #[tokio::test]
    async fn policy_can_reject_transitions() {
        let coordinator = coordinator().with_policy(Arc::new(StrictPolicy));
        let task = coordinator.create(NewTask::default()).await.unwrap();

        let err = coordinator
            .update_status(&task.id, TaskState::InputRequired, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        coordinator
            .update_status(&task.id, TaskState::Working, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_open_task() {
        let coordinator = coordinator();
        let task = coordinator.create(NewTask::default()).await.unwrap();
        let cancelled = coordinator.cancel(&task.id).await.unwrap();
        assert_eq!(cancelled.state(), TaskState::Cancelled);
        assert!(cancelled.status.timestamp >= task.status.timestamp);
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let coordinator = coordinator();
        let ghost = TaskId::from("ghost");
        assert!(matches!(coordinator.get(&ghost, None).await, Err(Error::NotFound { .. })));
        assert!(matches!(
            coordinator.update_status(&ghost, TaskState::Working, None).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(coordinator.cancel(&ghost).await, Err(Error::NotFound { .. })));
        assert!(matches!(coordinator.delete(&ghost).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn pagination_reports_total() {
        let coordinator = coordinator();
        let ctx = ContextId::from("trip");
        for _ in 0..5 {
            coordinator
                .create(NewTask::default().in_context(ctx.clone()))
                .await
                .unwrap();
        }
        coordinator.create(NewTask::default()).await.unwrap();

        let filter = TaskFilter::default().with_context(ctx);
        let first = coordinator.list(&filter.clone().page(2, 0)).await.unwrap();
        let second = coordinator.list(&filter.clone().page(2, 2)).await.unwrap();
        let third = coordinator.list(&filter.page(2, 4)).await.unwrap();

        assert_eq!((first.tasks.len(), first.total), (2, 5));
        assert_eq!((second.tasks.len(), second.total), (2, 5));
        assert_eq!((third.tasks.len(), third.total), (1, 5));
        assert_ne!(first.tasks[0].id, second.tasks[0].id);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let coordinator = coordinator();
        let err = coordinator
            .list(&TaskFilter::default().page(0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn history_length_trims_returned_copy() {
        let coordinator = coordinator();
        let task = coordinator.create(NewTask::default()).await.unwrap();
        for i in 0..4 {
            coordinator
                .update_status(&task.id, TaskState::Working, Some(Message::agent_text(format!("step {i}"))))
                .await
                .unwrap();
        }

        let trimmed = coordinator.get(&task.id, Some(1)).await.unwrap();
        assert_eq!(trimmed.history.len(), 1);
        assert_eq!(trimmed.history[0].text(), "step 3");
        assert_eq!(coordinator.get(&task.id, None).await.unwrap().history.len(), 4);
    }

    #[tokio::test]
    async fn artifacts_only_on_open_tasks() {
        let coordinator = coordinator();
        let task = coordinator.create(NewTask::default()).await.unwrap();
        let updated = coordinator
            .add_artifact(&task.id, Artifact::new("report", vec![Part::text("42")]))
            .await
            .unwrap();
        assert_eq!(updated.artifacts.len(), 1);

        coordinator
            .update_status(&task.id, TaskState::Failed, None)
            .await
            .unwrap();
        let err = coordinator
            .add_artifact(&task.id, Artifact::new("late", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }
}
