//! Mapping of bus errors onto HTTP responses

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use thronglets_core::{Error, ToolError};
use tracing::error;

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Core(Error::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(e) => core_status(e),
            Self::Tool(ToolError::AppNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Tool(ToolError::AppUnhealthy { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Tool(ToolError::ToolCallFailed(_)) => StatusCode::BAD_GATEWAY,
            Self::Tool(ToolError::Storage(e)) => core_status(e),
        }
    }
}

fn core_status(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } | Error::RecipientNotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidTransition { .. } => StatusCode::CONFLICT,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::BackendUnavailable(_) | Error::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
