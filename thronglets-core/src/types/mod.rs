//! Entity model shared by every component of the bus.

use chrono::{DateTime, Utc};

mod agent;
mod app;
mod ids;
mod message;
mod task;

pub use agent::{
    AgentCapabilities, AgentCard, AgentExtension, AgentInterface, AgentProvider, AgentSkill,
    RegisteredAgent,
};
pub use app::{AppCard, RegisteredApp};
pub use ids::{AgentId, AppId, ContextId, MessageId, TaskId};
pub use message::{FileRef, InternalMessage, Message, Part, PartContent, Role};
pub use task::{Artifact, Task, TaskState, TaskStatus};

/// Free-form key/value metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// `Utc::now()`, nudged forward so it is strictly after `previous`.
pub(crate) fn now_after(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}
