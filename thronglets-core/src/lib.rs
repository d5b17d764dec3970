//! thronglets-core: coordination core of the thronglets multi-agent service bus
//!
//! Agents and apps register here, discover each other, exchange messages and
//! track tasks. Everything persistent goes through the [`Storage`] trait:
//!
//! - **Entity model** - [`types`] for agents, apps, tasks and messages
//! - **Storage** - [`Storage`] trait and the volatile [`InMemoryStorage`]
//! - **Agent registry** - [`AgentRegistry`] with renewal by (name, version)
//! - **App registry** - [`AppRegistry`] with the health-check state machine
//! - **Tool bridge** - [`ToolBridge`] and [`McpHttpProxy`] for app tool calls
//! - **Message router** - [`MessageRouter`] with read-once delivery
//! - **Task coordinator** - [`TaskCoordinator`] enforcing the task lifecycle
//! - **Bus client** - [`BusClient`] for agent processes joining a bus over HTTP
//!
//! # Quick Start
//!
//! ```no_run
//! use thronglets_core::{AgentCard, Message, OutgoingMessage, ServiceBus};
//!
//! async fn example() -> thronglets_core::Result<()> {
//!     let bus = ServiceBus::in_memory();
//!     let alice = bus.agents.register(AgentCard::new("alice", "planner", "1.0")).await?;
//!     let bob = bus.agents.register(AgentCard::new("bob", "booker", "1.0")).await?;
//!
//!     bus.messages
//!         .send(OutgoingMessage::new(bob.agent_id.clone(), Message::agent_text("hello"))
//!             .from_agent(alice.agent_id))
//!         .await?;
//!
//!     let inbox = bus.messages.receive(&bob.agent_id, true, 10).await?;
//!     assert_eq!(inbox[0].message.text(), "hello");
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod app;
mod bus;
pub mod client;
pub mod error;
pub mod message;
pub mod storage;
pub mod task;
pub mod types;

pub use agent::AgentRegistry;
pub use app::{
    AppRegistry, CallerContext, HealthCheckConfig, HealthProbe, HttpHealthProbe, McpHttpProxy,
    ToolBridge, ToolCall, ToolError, ToolInfo, ToolProxy, ToolResult,
};
pub use bus::ServiceBus;
pub use client::{BusClient, ClientError};
pub use error::{EntityKind, Error, Result};
pub use message::{DEFAULT_RECEIVE_LIMIT, MessageRouter, OutgoingMessage};
pub use storage::{InMemoryStorage, Storage, TaskFilter, TaskPage};
pub use task::{CREATED_BY_KEY, NewTask, PermissivePolicy, TaskCoordinator, TransitionPolicy};
pub use types::{
    AgentCard, AgentId, AppCard, AppId, Artifact, ContextId, InternalMessage, Message, MessageId,
    Metadata, Part, RegisteredAgent, RegisteredApp, Role, Task, TaskId, TaskState, TaskStatus,
};
