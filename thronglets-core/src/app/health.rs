//! Health probing for registered apps.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Settings for the periodic app health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Time between health check passes.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-probe deadline.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive failures before an app is flagged unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_unhealthy_threshold() -> u32 {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

impl HealthCheckConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_threshold = threshold.max(1);
        self
    }
}

/// Answers whether a health endpoint is up.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True on success. Errors and timeouts count as failure.
    async fn probe(&self, url: &str, timeout: Duration) -> bool;
}

/// Probe that issues an HTTP GET and accepts any 2xx.
#[derive(Clone, Default)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> bool {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => {
                trace!(url, status = %resp.status(), "Health probe answered");
                resp.status().is_success()
            }
            Err(e) => {
                trace!(url, error = %e, "Health probe failed");
                false
            }
        }
    }
}
