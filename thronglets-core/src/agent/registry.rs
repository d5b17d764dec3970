//! Agent registry with renewal-by-identity.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{AgentCard, AgentId, RegisteredAgent};

/// Registers, renews and looks up agents.
///
/// An agent re-registering with the same name and version keeps its ID.
/// Expiry is left to the storage backend (TTL on the networked store).
pub struct AgentRegistry {
    storage: Arc<dyn Storage>,
}

impl AgentRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Register a card, renewing an existing registration with the same identity.
    #[instrument(name = "agent::register", skip(self, card), fields(name = %card.name, version = %card.version))]
    pub async fn register(&self, card: AgentCard) -> Result<RegisteredAgent> {
        if let Some(mut existing) = self
            .storage
            .find_agent_by_name(&card.name, Some(&card.version))
            .await?
        {
            existing.card = card;
            existing.mark_seen();
            let agent = self.storage.register_agent(existing).await?;
            debug!(agent_id = %agent.agent_id, "Renewed agent registration");
            return Ok(agent);
        }

        let agent = self
            .storage
            .register_agent(RegisteredAgent::new(card))
            .await?;
        info!(agent_id = %agent.agent_id, "Registered agent");
        Ok(agent)
    }

    pub async fn get(&self, agent_id: &AgentId) -> Result<RegisteredAgent> {
        self.storage
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| Error::agent_not_found(agent_id))
    }

    pub async fn exists(&self, agent_id: &AgentId) -> Result<bool> {
        Ok(self.storage.get_agent(agent_id).await?.is_some())
    }

    pub async fn list(&self) -> Result<Vec<RegisteredAgent>> {
        self.storage.list_agents().await
    }

    #[instrument(name = "agent::delete", skip(self, agent_id), fields(agent_id = %agent_id))]
    pub async fn delete(&self, agent_id: &AgentId) -> Result<()> {
        if !self.storage.delete_agent(agent_id).await? {
            return Err(Error::agent_not_found(agent_id));
        }
        info!("Deleted agent");
        Ok(())
    }

    /// Heartbeat: refresh `last_seen_at` and re-arm any expiry.
    pub async fn touch(&self, agent_id: &AgentId) -> Result<RegisteredAgent> {
        self.storage
            .touch_agent(agent_id)
            .await?
            .ok_or_else(|| Error::agent_not_found(agent_id))
    }

    pub async fn find_by_name(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<RegisteredAgent>> {
        self.storage.find_agent_by_name(name, version).await
    }
}
