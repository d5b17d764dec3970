//! HTTP server module

mod agents;
mod apps;
pub mod error;
mod messages;
mod system;
mod tasks;

use std::fmt::Display;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use thronglets_core::AgentId;

use crate::AppState;

pub use agents::AgentListResponse;
pub use apps::{AppListResponse, AppToolsResponse};
pub use error::{ApiError, ErrorResponse};
pub use messages::{MessageListResponse, SendMessageRequest};
pub use system::HealthResponse;
pub use tasks::{CreateTaskRequest, MAX_PAGE_SIZE, TaskListResponse, UpdateStatusRequest};

/// Header naming the calling agent
pub const AGENT_ID_HEADER: &str = "x-agent-id";

/// Body returned by DELETE endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub status: String,
    pub id: String,
}

impl DeletedResponse {
    fn new(id: impl Display) -> Self {
        Self {
            status: "deleted".to_string(),
            id: id.to_string(),
        }
    }
}

/// The calling agent, when the request names one.
fn caller_id(headers: &HeaderMap) -> Option<AgentId> {
    headers
        .get(AGENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(AgentId::from)
}

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(system::health))
        .route("/.well-known/agent", get(system::agent_card))
        // Agents
        .route(
            "/agents",
            post(agents::register_agent).get(agents::list_agents),
        )
        .route(
            "/agents/:id",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route("/agents/:id/touch", post(agents::touch_agent))
        .route("/agents/:id/messages", get(messages::receive_messages))
        .route("/agents/:id/messages/all", get(messages::message_history))
        // Messages
        .route("/messages", post(messages::send_message))
        // Apps
        .route("/apps", post(apps::register_app).get(apps::list_apps))
        .route(
            "/apps/:id",
            get(apps::get_app)
                .put(apps::update_app)
                .delete(apps::delete_app),
        )
        .route("/apps/:id/tools", get(apps::list_tools))
        .route("/apps/:id/tools/:tool", post(apps::call_tool))
        // Tasks
        .route("/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route(
            "/tasks/:id",
            get(tasks::get_task).delete(tasks::delete_task),
        )
        .route("/tasks/:id/status", post(tasks::update_status))
        .route("/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/tasks/:id/artifacts", post(tasks::add_artifact))
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_server_with(state: AppState) -> axum_test::TestServer {
    axum_test::TestServer::new(create_router(Arc::new(state))).unwrap()
}

/// Server over a fresh in-memory bus, plus a handle on its state.
#[cfg(test)]
pub(crate) fn test_server() -> (axum_test::TestServer, AppState) {
    let state = AppState::in_memory();
    (test_server_with(state.clone()), state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_router_has_health_endpoint() {
        let (server, _state) = test_server();
        let response = server.get("/api/health").await;
        response.assert_status_ok();
    }

    #[test]
    fn caller_id_ignores_blank_header() {
        let mut headers = HeaderMap::new();
        assert!(caller_id(&headers).is_none());

        headers.insert(AGENT_ID_HEADER, HeaderValue::from_static("  "));
        assert!(caller_id(&headers).is_none());

        headers.insert(AGENT_ID_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(caller_id(&headers), Some(AgentId::from("alice")));
    }
}
