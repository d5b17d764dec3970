//! Error types for thronglets-core

use std::fmt;

use thiserror::Error;

use crate::types::TaskState;

/// Kind of entity referenced by a [`Error::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Agent,
    App,
    Task,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Agent => "agent",
            Self::App => "app",
            Self::Task => "task",
        };
        f.write_str(name)
    }
}

/// Top-level error type for thronglets-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("recipient agent not found: {0}")]
    RecipientNotFound(String),

    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("storage backend is not connected")]
    NotConnected,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn agent_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: EntityKind::Agent,
            id: id.to_string(),
        }
    }

    pub fn app_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: EntityKind::App,
            id: id.to_string(),
        }
    }

    pub fn task_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: EntityKind::Task,
            id: id.to_string(),
        }
    }

    /// Returns true for errors caused by the storage backend rather than the request.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::NotConnected)
    }
}

/// Result type alias for thronglets-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_entity() {
        let err = Error::task_not_found("t-1");
        assert_eq!(err.to_string(), "task not found: t-1");
    }

    #[test]
    fn invalid_transition_message() {
        let err = Error::InvalidTransition {
            task_id: "t-1".into(),
            from: TaskState::Completed,
            to: TaskState::Working,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for task t-1: completed -> working"
        );
    }

    #[test]
    fn backend_errors_are_classified() {
        assert!(Error::NotConnected.is_backend());
        assert!(Error::BackendUnavailable("down".into()).is_backend());
        assert!(!Error::Validation("bad".into()).is_backend());
    }
}
