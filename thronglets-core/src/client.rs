//! HTTP client an agent process uses to join a running bus.
//!
//! [`BusClient::connect`] registers the agent card, then keeps re-registering
//! it on a fixed interval. Registration renews by (name, version), so the
//! heartbeat keeps the same agent ID and re-arms its expiry on stores with an
//! agent TTL. [`BusClient::shutdown`] stops the heartbeat and unregisters.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::{AgentCard, AgentId, RegisteredAgent};

/// Default time between heartbeat registrations.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from talking to the bus over HTTP
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}: {body}")]
    Status { url: String, status: u16, body: String },
}

/// Shared pieces the heartbeat task needs.
#[derive(Clone)]
struct Registration {
    http: reqwest::Client,
    base_url: String,
    card: AgentCard,
    current: Arc<RwLock<Option<RegisteredAgent>>>,
}

impl Registration {
    async fn register(&self) -> Result<RegisteredAgent, ClientError> {
        let url = format!("{}/agents", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .json(&self.card)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let agent: RegisteredAgent = resp
            .json()
            .await
            .map_err(|source| ClientError::Request { url, source })?;
        *self.current.write().await = Some(agent.clone());
        Ok(agent)
    }

    /// DELETE the registration. Failures are logged and swallowed.
    async fn unregister(&self) {
        let Some(agent) = self.current.write().await.take() else {
            return;
        };
        let url = format!("{}/agents/{}", self.base_url, agent.agent_id);
        match self
            .http
            .delete(&url)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!(agent_id = %agent.agent_id, "Unregistered from bus");
            }
            Ok(resp) => {
                warn!(agent_id = %agent.agent_id, status = %resp.status(), "Bus refused unregister");
            }
            Err(e) => {
                warn!(agent_id = %agent.agent_id, error = %e, "Failed to unregister from bus");
            }
        }
    }
}

/// A registered agent's connection to the bus.
pub struct BusClient {
    registration: Registration,
    heartbeat_interval: Duration,
    heartbeat: Option<(CancellationToken, JoinHandle<()>)>,
}

impl BusClient {
    /// A client that has not registered yet. `base_url` is the bus's HTTP
    /// root, e.g. `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>, card: AgentCard) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, card)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, card: AgentCard) -> Self {
        let base_url: String = base_url.into();
        Self {
            registration: Registration {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                card,
                current: Arc::new(RwLock::new(None)),
            },
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat: None,
        }
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Register and start the heartbeat.
    pub async fn connect(base_url: impl Into<String>, card: AgentCard) -> Result<Self, ClientError> {
        let mut client = Self::new(base_url, card);
        client.start().await?;
        Ok(client)
    }

    /// Register now and keep re-registering every heartbeat interval.
    /// Calling it again restarts the heartbeat.
    pub async fn start(&mut self) -> Result<RegisteredAgent, ClientError> {
        let agent = self.registration.register().await?;
        info!(agent_id = %agent.agent_id, bus = %self.registration.base_url, "Registered with bus");

        self.stop_heartbeat().await;
        let token = CancellationToken::new();
        let handle = tokio::spawn(heartbeat(
            self.registration.clone(),
            self.heartbeat_interval,
            token.clone(),
        ));
        self.heartbeat = Some((token, handle));
        Ok(agent)
    }

    /// Stop the heartbeat, then unregister. Unregistering is best-effort.
    pub async fn shutdown(mut self) {
        self.stop_heartbeat().await;
        self.registration.unregister().await;
    }

    async fn stop_heartbeat(&mut self) {
        if let Some((token, handle)) = self.heartbeat.take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Heartbeat task ended abnormally");
            }
        }
    }

    pub fn base_url(&self) -> &str {
        &self.registration.base_url
    }

    pub fn card(&self) -> &AgentCard {
        &self.registration.card
    }

    /// The latest registration, if registered.
    pub async fn registered_agent(&self) -> Option<RegisteredAgent> {
        self.registration.current.read().await.clone()
    }

    pub async fn agent_id(&self) -> Option<AgentId> {
        self.registration
            .current
            .read()
            .await
            .as_ref()
            .map(|agent| agent.agent_id.clone())
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        if let Some((token, _)) = &self.heartbeat {
            token.cancel();
        }
    }
}

async fn heartbeat(registration: Registration, interval: Duration, shutdown: CancellationToken) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match registration.register().await {
                Ok(agent) => debug!(agent_id = %agent.agent_id, "Heartbeat renewed registration"),
                Err(e) => warn!(error = %e, "Heartbeat registration failed"),
            },
        }
    }
}
