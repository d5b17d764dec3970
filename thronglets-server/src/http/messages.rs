//! Message endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use thronglets_core::storage::validate_limit;
use thronglets_core::{
    AgentId, ContextId, DEFAULT_RECEIVE_LIMIT, InternalMessage, Message, OutgoingMessage, TaskId,
};

use super::{ApiError, caller_id};
use crate::AppState;

/// Query for receiving messages
#[derive(Debug, Deserialize)]
pub struct ReceiveQuery {
    #[serde(default = "default_mark_as_read")]
    pub mark_as_read: bool,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_mark_as_read() -> bool {
    true
}

fn default_limit() -> usize {
    DEFAULT_RECEIVE_LIMIT
}

/// Response carrying a batch of messages
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<InternalMessage>,
    pub total: usize,
}

impl From<Vec<InternalMessage>> for MessageListResponse {
    fn from(messages: Vec<InternalMessage>) -> Self {
        Self {
            total: messages.len(),
            messages,
        }
    }
}

/// Request to send a message
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub to_agent_id: AgentId,
    pub message: Message,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub context_id: Option<ContextId>,
}

/// POST /messages - Queue a message; the sender comes from `X-Agent-ID`
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<InternalMessage>), ApiError> {
    let mut outgoing = OutgoingMessage::new(request.to_agent_id, request.message);
    if let Some(from) = caller_id(&headers) {
        outgoing = outgoing.from_agent(from);
    }
    if let Some(task_id) = request.task_id {
        outgoing = outgoing.in_task(task_id);
    }
    if let Some(context_id) = request.context_id {
        outgoing = outgoing.in_context(context_id);
    }

    let queued = state.bus.messages.send(outgoing).await?;
    Ok((StatusCode::CREATED, Json(queued)))
}

/// GET /agents/:id/messages - Unread messages, oldest first
pub async fn receive_messages(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<AgentId>,
    Query(query): Query<ReceiveQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let limit = validate_limit(query.limit)?;
    let messages = state
        .bus
        .messages
        .receive(&agent_id, query.mark_as_read, limit)
        .await?;
    Ok(Json(messages.into()))
}

/// GET /agents/:id/messages/all - Every message, read or unread
pub async fn message_history(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<AgentId>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let messages = state.bus.messages.history(&agent_id).await?;
    Ok(Json(messages.into()))
}
