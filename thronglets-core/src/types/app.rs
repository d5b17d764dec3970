//! App cards and registrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppId;

/// Manifest for a scenario-based tool service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppCard {
    pub name: String,
    pub description: String,
    pub scenario: String,
    /// Streamable-HTTP MCP endpoint the tool proxy talks to
    pub mcp_endpoint: String,
    /// Probed periodically; any 2xx counts as healthy
    pub health_check_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// An app known to the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredApp {
    pub app_id: AppId,
    pub card: AppCard,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_healthy() -> bool {
    true
}

impl RegisteredApp {
    pub fn new(card: AppCard) -> Self {
        let now = Utc::now();
        Self {
            app_id: AppId::new(),
            card,
            registered_at: now,
            last_seen_at: now,
            healthy: true,
        }
    }

    /// Refresh `last_seen_at`, keeping it strictly increasing.
    pub fn mark_seen(&mut self) {
        self.last_seen_at = super::now_after(self.last_seen_at);
    }
}
