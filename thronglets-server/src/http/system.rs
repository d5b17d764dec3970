//! Health and discovery endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use thronglets_core::AgentCard;

use super::ApiError;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the server
    pub status: String,
    /// Server version
    pub version: String,
    /// Seconds since server started
    pub uptime_seconds: i64,
    /// Name of the storage backend
    pub storage: String,
    pub storage_connected: bool,
    pub agents_count: usize,
    pub apps_count: usize,
    pub healthy_apps_count: usize,
}

/// GET /api/health - Server status and registry counts
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let bus = &state.bus;
    let storage_connected = bus.storage.is_connected().await;
    let agents = bus.agents.list().await?;
    let apps = bus.apps.list(false).await?;

    Ok(Json(HealthResponse {
        status: if storage_connected { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        storage: bus.storage.name().to_string(),
        storage_connected,
        agents_count: agents.len(),
        apps_count: apps.len(),
        healthy_apps_count: apps.iter().filter(|a| a.healthy).count(),
    }))
}

/// GET /.well-known/agent - The bus's own agent card
pub async fn agent_card(State(state): State<Arc<AppState>>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server;
    use thronglets_core::AgentCard;

    #[tokio::test]
    async fn test_health_counts_registrations() {
        let (server, state) = test_server();
        state
            .bus
            .agents
            .register(AgentCard::new("alice", "planner", "1.0"))
            .await
            .unwrap();

        let response = server.get("/api/health").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert_eq!(body.storage, "memory");
        assert_eq!(body.agents_count, 1);
        assert_eq!(body.apps_count, 0);
    }

    #[tokio::test]
    async fn test_agent_card_served() {
        let (server, _state) = test_server();
        let response = server.get("/.well-known/agent").await;
        response.assert_status_ok();

        let card: AgentCard = response.json();
        assert_eq!(card.name, "Thronglets ServiceBus");
        assert_eq!(card.skills.len(), 3);
    }
}
