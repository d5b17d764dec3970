//! Wiring of every service around one storage handle.

use std::sync::Arc;

use crate::agent::AgentRegistry;
use crate::app::{AppRegistry, HealthCheckConfig, McpHttpProxy, ToolBridge, ToolProxy};
use crate::message::MessageRouter;
use crate::error::Result;
use crate::storage::Storage;
use crate::task::TaskCoordinator;
use crate::types::{AgentId, AppId};

/// The coordination services of one bus instance, sharing a storage backend.
pub struct ServiceBus {
    pub storage: Arc<dyn Storage>,
    pub agents: Arc<AgentRegistry>,
    pub apps: Arc<AppRegistry>,
    pub messages: Arc<MessageRouter>,
    pub tasks: Arc<TaskCoordinator>,
    pub tools: Arc<ToolBridge>,
}

impl ServiceBus {
    /// Services with HTTP health probes and the MCP tool proxy.
    pub fn new(storage: Arc<dyn Storage>, health: HealthCheckConfig) -> Self {
        let apps = AppRegistry::new(Arc::clone(&storage), health);
        Self::with_components(storage, apps, Arc::new(McpHttpProxy::new()))
    }

    pub fn with_components(
        storage: Arc<dyn Storage>,
        apps: AppRegistry,
        proxy: Arc<dyn ToolProxy>,
    ) -> Self {
        Self {
            agents: Arc::new(AgentRegistry::new(Arc::clone(&storage))),
            apps: Arc::new(apps),
            messages: Arc::new(MessageRouter::new(Arc::clone(&storage))),
            tasks: Arc::new(TaskCoordinator::new(Arc::clone(&storage))),
            tools: Arc::new(ToolBridge::new(Arc::clone(&storage), proxy)),
            storage,
        }
    }

    /// Unregister an agent and drop the tool sessions opened for it.
    pub async fn delete_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.agents.delete(agent_id).await?;
        self.tools.forget_agent(agent_id).await;
        Ok(())
    }

    /// Delete an app and drop its cached tools and sessions.
    pub async fn delete_app(&self, app_id: &AppId) -> Result<()> {
        self.apps.delete(app_id).await?;
        self.tools.forget_app(app_id).await;
        Ok(())
    }

    /// An isolated bus on a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(crate::storage::InMemoryStorage::new()),
            HealthCheckConfig::default(),
        )
    }
}
