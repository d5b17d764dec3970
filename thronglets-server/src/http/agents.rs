//! Agent registration endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thronglets_core::{AgentCard, AgentId, RegisteredAgent};

use super::{ApiError, DeletedResponse};
use crate::AppState;

/// Response for listing agents
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentListResponse {
    pub agents: Vec<RegisteredAgent>,
    pub total: usize,
}

/// POST /agents - Register an agent, renewing a matching (name, version)
pub async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(card): Json<AgentCard>,
) -> Result<(StatusCode, Json<RegisteredAgent>), ApiError> {
    let agent = state.bus.agents.register(card).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /agents - List registered agents
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AgentListResponse>, ApiError> {
    let agents = state.bus.agents.list().await?;
    Ok(Json(AgentListResponse {
        total: agents.len(),
        agents,
    }))
}

/// GET /agents/:id
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<AgentId>,
) -> Result<Json<RegisteredAgent>, ApiError> {
    Ok(Json(state.bus.agents.get(&agent_id).await?))
}

/// DELETE /agents/:id
pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<AgentId>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.bus.delete_agent(&agent_id).await?;
    Ok(Json(DeletedResponse::new(agent_id)))
}

/// POST /agents/:id/touch - Heartbeat
pub async fn touch_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<AgentId>,
) -> Result<Json<RegisteredAgent>, ApiError> {
    Ok(Json(state.bus.agents.touch(&agent_id).await?))
}
