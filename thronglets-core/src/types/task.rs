//! Tasks and their lifecycle states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContextId, Message, Metadata, Part, TaskId};
use crate::error::Error;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    AuthRequired,
    Completed,
    Failed,
    Cancelled,
    Rejected,
}

impl TaskState {
    pub const ALL: [TaskState; 8] = [
        Self::Submitted,
        Self::Working,
        Self::InputRequired,
        Self::AuthRequired,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Rejected,
    ];

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input_required",
            Self::AuthRequired => "auth_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|st| st.as_str()).collect();
                Error::Validation(format!(
                    "invalid task status '{s}', expected one of: {}",
                    valid.join(", ")
                ))
            })
    }
}

/// Current status of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Utc::now(),
        }
    }
}

/// Named output produced by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default = "default_artifact_id")]
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

fn default_artifact_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

impl Artifact {
    pub fn new(name: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            artifact_id: default_artifact_id(),
            name: Some(name.into()),
            description: None,
            parts,
            metadata: None,
            extensions: Vec::new(),
        }
    }
}

/// A unit of work tracked by the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub context_id: ContextId,
    pub status: TaskStatus,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Task {
    /// A new task in the `submitted` state.
    pub fn new(context_id: Option<ContextId>) -> Self {
        Self {
            id: TaskId::new(),
            context_id: context_id.unwrap_or_default(),
            status: TaskStatus::new(TaskState::Submitted),
            artifacts: Vec::new(),
            history: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.status.state
    }

    pub fn is_terminal(&self) -> bool {
        self.status.state.is_terminal()
    }

    /// Keep only the last `n` history entries.
    pub fn truncate_history(&mut self, n: usize) {
        let len = self.history.len();
        if len > n {
            self.history.drain(..len - n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = TaskState::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
                TaskState::Rejected
            ]
        );
    }

    #[test]
    fn state_parses_wire_names() {
        assert_eq!(
            "input_required".parse::<TaskState>().unwrap(),
            TaskState::InputRequired
        );
        assert_eq!(
            serde_json::to_string(&TaskState::AuthRequired).unwrap(),
            "\"auth_required\""
        );
    }

    #[test]
    fn unknown_state_is_a_validation_error() {
        let err = "done".parse::<TaskState>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("submitted"));
    }

    #[test]
    fn new_task_gets_fresh_context() {
        let task = Task::new(None);
        assert_eq!(task.state(), TaskState::Submitted);
        assert!(!task.context_id.as_str().is_empty());

        let ctx = ContextId::from("ctx-1");
        assert_eq!(Task::new(Some(ctx.clone())).context_id, ctx);
    }

    #[test]
    fn truncate_history_keeps_latest() {
        let mut task = Task::new(None);
        for i in 0..5 {
            task.history.push(Message::user_text(format!("m{i}")));
        }
        task.truncate_history(2);
        assert_eq!(task.history.len(), 2);
        assert_eq!(task.history[0].text(), "m3");
        assert_eq!(task.history[1].text(), "m4");

        task.truncate_history(10);
        assert_eq!(task.history.len(), 2);
    }
}
