//! Agent presence and discovery.

mod registry;

pub use registry::AgentRegistry;
