//! Server error types

use thiserror::Error;

/// Errors that can occur while starting or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Storage backend could not be brought up or torn down
    #[error("storage error: {0}")]
    Storage(#[from] thronglets_core::Error),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
