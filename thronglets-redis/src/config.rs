//! Configuration for the Redis backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings, key prefix and per-entity expiry.
///
/// A TTL of zero means the entity never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Logical database index.
    #[serde(default)]
    pub db: i64,

    /// Prefix for every key written by the bus.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Seconds an agent stays registered without a heartbeat.
    #[serde(default = "default_agent_ttl")]
    pub agent_ttl_secs: u64,

    /// Seconds a task is kept after its last write.
    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,

    /// Seconds a message is kept after its last write.
    #[serde(default = "default_message_ttl")]
    pub message_ttl_secs: u64,

    /// Seconds an app is kept after its last write.
    #[serde(default)]
    pub app_ttl_secs: u64,

    /// Connect and response timeout.
    #[serde(default = "default_socket_timeout", with = "humantime_serde")]
    pub socket_timeout: Duration,
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_prefix() -> String {
    "thronglets:".to_string()
}

fn default_agent_ttl() -> u64 {
    60
}

fn default_task_ttl() -> u64 {
    86_400 * 7
}

fn default_message_ttl() -> u64 {
    86_400 * 3
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            db: 0,
            prefix: default_prefix(),
            agent_ttl_secs: default_agent_ttl(),
            task_ttl_secs: default_task_ttl(),
            message_ttl_secs: default_message_ttl(),
            app_ttl_secs: 0,
            socket_timeout: default_socket_timeout(),
        }
    }
}

impl RedisConfig {
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_agent_ttl(mut self, secs: u64) -> Self {
        self.agent_ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn with_message_ttl(mut self, secs: u64) -> Self {
        self.message_ttl_secs = secs;
        self
    }

    /// URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &self.url[..scheme_end], &self.url[at..])
            }
            _ => self.url.clone(),
        }
    }
}
