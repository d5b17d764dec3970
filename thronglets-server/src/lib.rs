//! thronglets-server - HTTP API for the thronglets service bus
//!
//! This crate owns the [`ServiceBus`] for one process, serves it over a
//! JSON HTTP API and runs the app health monitor for the server's lifetime.

mod backend;
mod error;
pub mod http;
mod state;

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thronglets_core::{HealthCheckConfig, ServiceBus};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use backend::StorageBackend;
pub use error::ServerError;
pub use http::create_router;
pub use state::{AppState, service_bus_card};

/// The thronglets HTTP server
pub struct ThrongletsServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ThrongletsServer {
    /// Connect the storage backend and wire the bus around it.
    pub async fn build(
        config: ServerConfig,
        backend: &StorageBackend,
        health: HealthCheckConfig,
    ) -> Result<Self, ServerError> {
        let storage = backend.build().await?;
        let bus = ServiceBus::new(storage, health);
        let state = AppState::new(bus).with_card(service_bus_card(&config.base_url()));
        Ok(Self::with_state(config, Arc::new(state)))
    }

    /// Create a server with custom state (for testing)
    pub fn with_state(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the shared application state
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves, then stop the health monitor and
    /// disconnect storage.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        info!("thronglets server listening on {}", addr);

        let cancel = CancellationToken::new();
        let monitor = Arc::clone(&self.state.bus.apps).spawn_health_monitor(cancel.clone());

        let router = create_router(Arc::clone(&self.state));
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));

        cancel.cancel();
        if let Err(e) = monitor.await {
            warn!(error = %e, "Health monitor ended abnormally");
        }
        self.state.bus.storage.disconnect().await?;
        info!("thronglets server stopped");

        served
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Create a new ServerConfig with the specified host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the socket address string (e.g., "0.0.0.0:8000")
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL other agents reach the bus at
    pub fn base_url(&self) -> String {
        let host = if self.host == "0.0.0.0" {
            "localhost"
        } else {
            self.host.as_str()
        };
        format!("http://{}:{}", host, self.port)
    }
}
