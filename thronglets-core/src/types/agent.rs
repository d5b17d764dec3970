//! Agent cards and registrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AgentId;

/// A URL plus the transport protocol an agent speaks on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInterface {
    pub url: String,
    pub protocol_binding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

/// Organization operating an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProvider {
    pub organization: String,
    pub url: String,
}

/// Protocol extension supported by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExtension {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Optional capabilities an agent advertises
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<AgentExtension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_transition_history: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_agent_card: Option<bool>,
}

/// A distinct function an agent can perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_modes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_modes: Option<Vec<String>>,
}

/// Self-describing manifest an agent registers with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(default = "default_protocol_versions")]
    pub protocol_versions: Vec<String>,
    #[serde(default)]
    pub supported_interfaces: Vec<AgentInterface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AgentProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default = "default_modes")]
    pub default_input_modes: Vec<String>,
    #[serde(default = "default_modes")]
    pub default_output_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

fn default_protocol_versions() -> Vec<String> {
    vec!["1.0".to_string()]
}

fn default_modes() -> Vec<String> {
    vec!["text/plain".to_string()]
}

impl AgentCard {
    /// Minimal card with defaults for every optional field.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            protocol_versions: default_protocol_versions(),
            supported_interfaces: Vec::new(),
            provider: None,
            documentation_url: None,
            capabilities: AgentCapabilities::default(),
            skills: Vec::new(),
            default_input_modes: default_modes(),
            default_output_modes: default_modes(),
            icon_url: None,
        }
    }

    #[must_use]
    pub fn with_interface(mut self, url: impl Into<String>, protocol: impl Into<String>) -> Self {
        self.supported_interfaces.push(AgentInterface {
            url: url.into(),
            protocol_binding: protocol.into(),
            tenant: None,
        });
        self
    }

    #[must_use]
    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }
}

/// An agent known to the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub agent_id: AgentId,
    pub card: AgentCard,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl RegisteredAgent {
    pub fn new(card: AgentCard) -> Self {
        let now = Utc::now();
        Self {
            agent_id: AgentId::new(),
            card,
            registered_at: now,
            last_seen_at: now,
        }
    }

    /// Refresh `last_seen_at`, keeping it strictly increasing.
    pub fn mark_seen(&mut self) {
        self.last_seen_at = super::now_after(self.last_seen_at);
    }

    /// Registrations are renewed when both name and version match.
    pub fn same_identity(&self, card: &AgentCard) -> bool {
        self.card.name == card.name && self.card.version == card.version
    }
}
