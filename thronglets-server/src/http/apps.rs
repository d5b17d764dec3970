//! App registration and tool endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use thronglets_core::{
    AppCard, AppId, CallerContext, Metadata, RegisteredApp, ToolCall, ToolInfo, ToolResult,
};

use super::{ApiError, DeletedResponse, caller_id};
use crate::AppState;

/// Query for listing apps
#[derive(Debug, Deserialize)]
pub struct ListAppsQuery {
    #[serde(default = "default_healthy_only")]
    pub healthy_only: bool,
}

fn default_healthy_only() -> bool {
    true
}

/// Response for listing apps
#[derive(Debug, Serialize, Deserialize)]
pub struct AppListResponse {
    pub apps: Vec<RegisteredApp>,
    pub total: usize,
}

/// Tools advertised by an app
#[derive(Debug, Serialize, Deserialize)]
pub struct AppToolsResponse {
    pub tools: Vec<ToolInfo>,
}

/// POST /apps - Register an app, replacing one with the same name
pub async fn register_app(
    State(state): State<Arc<AppState>>,
    Json(card): Json<AppCard>,
) -> Result<(StatusCode, Json<RegisteredApp>), ApiError> {
    let app = state.bus.apps.register(card).await?;
    state.bus.tools.forget_app(&app.app_id).await;
    Ok((StatusCode::CREATED, Json(app)))
}

/// GET /apps - List apps, healthy ones only unless `healthy_only=false`
pub async fn list_apps(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAppsQuery>,
) -> Result<Json<AppListResponse>, ApiError> {
    let apps = state.bus.apps.list(query.healthy_only).await?;
    Ok(Json(AppListResponse {
        total: apps.len(),
        apps,
    }))
}

/// GET /apps/:id
pub async fn get_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<AppId>,
) -> Result<Json<RegisteredApp>, ApiError> {
    Ok(Json(state.bus.apps.get(&app_id).await?))
}

/// PUT /apps/:id - Replace an app's card
pub async fn update_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<AppId>,
    Json(card): Json<AppCard>,
) -> Result<Json<RegisteredApp>, ApiError> {
    let app = state.bus.apps.update(&app_id, card).await?;
    state.bus.tools.forget_app(&app_id).await;
    Ok(Json(app))
}

/// DELETE /apps/:id
pub async fn delete_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<AppId>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.bus.delete_app(&app_id).await?;
    Ok(Json(DeletedResponse::new(app_id)))
}

/// GET /apps/:id/tools
pub async fn list_tools(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<AppId>,
) -> Result<Json<AppToolsResponse>, ApiError> {
    let tools = state.bus.tools.list_tools(&app_id).await?;
    Ok(Json(AppToolsResponse { tools }))
}

/// POST /apps/:id/tools/:tool - Execute a tool with the body as arguments
///
/// Requires `X-Agent-ID`. Request headers are passed through to the app.
pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path((app_id, tool)): Path<(AppId, String)>,
    headers: HeaderMap,
    Json(arguments): Json<Metadata>,
) -> Result<Json<ToolResult>, ApiError> {
    let agent_id = caller_id(&headers)
        .ok_or_else(|| ApiError::validation("X-Agent-ID header is required for tool calls"))?;

    let mut caller = CallerContext::new(agent_id);
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            caller = caller.with_header(name.as_str(), value);
        }
    }

    let call = ToolCall {
        name: tool,
        arguments,
    };
    let result = state.bus.tools.call_tool(&app_id, &call, &caller).await?;
    Ok(Json(result))
}
