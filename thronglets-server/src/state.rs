//! Shared application state for the thronglets server

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thronglets_core::types::{AgentCapabilities, AgentSkill};
use thronglets_core::{AgentCard, ServiceBus};

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Registries, router and coordinator over one storage backend
    pub bus: Arc<ServiceBus>,
    /// The bus's own agent card, served at `/.well-known/agent`
    pub card: Arc<AgentCard>,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(bus: ServiceBus) -> Self {
        Self {
            bus: Arc::new(bus),
            card: Arc::new(service_bus_card("http://localhost:8000")),
            started_at: Utc::now(),
        }
    }

    /// State on a fresh in-memory bus (for testing)
    pub fn in_memory() -> Self {
        Self::new(ServiceBus::in_memory())
    }

    #[must_use]
    pub fn with_card(mut self, card: AgentCard) -> Self {
        self.card = Arc::new(card);
        self
    }

    /// Returns how long the server has been running
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

fn skill(id: &str, name: &str, description: &str, tags: &[&str]) -> AgentSkill {
    AgentSkill {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        examples: Vec::new(),
        input_modes: None,
        output_modes: None,
    }
}

/// The card the bus advertises for itself.
pub fn service_bus_card(base_url: &str) -> AgentCard {
    let mut card = AgentCard::new(
        "Thronglets ServiceBus",
        "Multi-agent service bus for agent registration, discovery and communication",
        env!("CARGO_PKG_VERSION"),
    )
    .with_interface(base_url, "HTTP+JSON")
    .with_skill(skill(
        "agent-registry",
        "Agent Registry",
        "Register and discover agents",
        &["registry", "discovery"],
    ))
    .with_skill(skill(
        "task-management",
        "Task Management",
        "Create and manage tasks",
        &["task", "workflow"],
    ))
    .with_skill(skill(
        "message-routing",
        "Message Routing",
        "Route messages between agents",
        &["message", "communication"],
    ));
    card.capabilities = AgentCapabilities {
        streaming: Some(false),
        push_notifications: Some(false),
        ..AgentCapabilities::default()
    };
    card.default_input_modes = vec!["application/json".to_string()];
    card.default_output_modes = vec!["application/json".to_string()];
    card
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_new() {
        let state = AppState::in_memory();
        assert!(state.uptime_seconds() >= 0);
        assert_eq!(state.card.name, "Thronglets ServiceBus");
    }

    #[test]
    fn test_bus_card_skills() {
        let card = service_bus_card("http://bus:9000");
        let ids: Vec<_> = card.skills.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["agent-registry", "task-management", "message-routing"]);
        assert_eq!(card.supported_interfaces[0].url, "http://bus:9000");
    }
}
