//! Task endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use thronglets_core::{
    Artifact, ContextId, Message, Metadata, NewTask, Task, TaskFilter, TaskId, TaskState,
};

use super::{ApiError, DeletedResponse, caller_id};
use crate::AppState;

/// Largest page a task listing may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Request to create a task
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub context_id: Option<ContextId>,
    #[serde(default)]
    pub initial_message: Option<Message>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Query for listing tasks
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub context_id: Option<ContextId>,
    pub status: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub page_token: String,
}

fn default_page_size() -> usize {
    thronglets_core::storage::DEFAULT_TASK_LIMIT
}

impl ListTasksQuery {
    fn into_filter(self) -> Result<TaskFilter, ApiError> {
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ApiError::validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let offset = if self.page_token.is_empty() {
            0
        } else {
            self.page_token
                .parse()
                .map_err(|_| ApiError::validation(format!("invalid page_token: {}", self.page_token)))?
        };

        let mut filter = TaskFilter::default().page(self.page_size, offset);
        if let Some(context_id) = self.context_id {
            filter = filter.with_context(context_id);
        }
        if let Some(status) = self.status {
            filter = filter.with_status(status.parse::<TaskState>()?);
        }
        Ok(filter)
    }
}

/// One page of tasks
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub total: usize,
    pub page_size: usize,
    /// Offset of the next page, empty on the last page
    pub next_page_token: String,
}

/// Query for fetching one task
#[derive(Debug, Deserialize)]
pub struct GetTaskQuery {
    pub history_length: Option<usize>,
}

/// Request to move a task to a new state
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub state: String,
    #[serde(default)]
    pub message: Option<Message>,
}

/// POST /tasks - Create a task; `X-Agent-ID` is recorded as its creator
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let mut new = NewTask::default().with_metadata(request.metadata.unwrap_or_default());
    if let Some(context_id) = request.context_id {
        new = new.in_context(context_id);
    }
    if let Some(message) = request.initial_message {
        new = new.with_message(message);
    }
    if let Some(agent_id) = caller_id(&headers) {
        new = new.created_by(agent_id);
    }

    let task = state.bus.tasks.create(new).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /tasks - Filtered, paginated listing
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let filter = query.into_filter()?;
    let page = state.bus.tasks.list(&filter).await?;

    let next_page_token = if page.has_more(&filter) {
        (filter.offset + filter.limit).to_string()
    } else {
        String::new()
    };
    Ok(Json(TaskListResponse {
        tasks: page.tasks,
        total: page.total,
        page_size: filter.limit,
        next_page_token,
    }))
}

/// GET /tasks/:id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
    Query(query): Query<GetTaskQuery>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(
        state.bus.tasks.get(&task_id, query.history_length).await?,
    ))
}

/// DELETE /tasks/:id
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.bus.tasks.delete(&task_id).await?;
    Ok(Json(DeletedResponse::new(task_id)))
}

/// POST /tasks/:id/status - Transition a non-terminal task
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Task>, ApiError> {
    let target: TaskState = request.state.parse()?;
    let task = state
        .bus
        .tasks
        .update_status(&task_id, target, request.message)
        .await?;
    Ok(Json(task))
}

/// POST /tasks/:id/cancel
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.bus.tasks.cancel(&task_id).await?))
}

/// POST /tasks/:id/artifacts
pub async fn add_artifact(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
    Json(artifact): Json<Artifact>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.bus.tasks.add_artifact(&task_id, artifact).await?))
}
