//! Identifier newtypes.
//!
//! All identifiers are opaque strings. Freshly generated ones are UUIDv7.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID using UUID v7 (time-ordered)
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique identifier for a registered agent
    AgentId
);
string_id!(
    /// Unique identifier for a registered app
    AppId
);
string_id!(
    /// Unique identifier for a task
    TaskId
);
string_id!(
    /// Unique identifier for a queued inter-agent message
    MessageId
);
string_id!(
    /// Groups related tasks and messages into one conversation
    ContextId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = AgentId::from("agent-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"agent-1\"");
        assert_eq!(id.to_string(), "agent-1");
    }
}
