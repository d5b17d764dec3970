//! Apps: tool-providing services, their health, and tool execution.

mod health;
mod mcp;
mod registry;
mod tools;

pub use health::{HealthCheckConfig, HealthProbe, HttpHealthProbe};
pub use mcp::{McpHttpProxy, PROTOCOL_VERSION};
pub use registry::AppRegistry;
pub use tools::{
    CallerContext, TOOL_CACHE_TTL, ToolBridge, ToolCall, ToolError, ToolInfo, ToolProxy,
    ToolResult,
};
