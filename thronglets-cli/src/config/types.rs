use std::time::Duration;

use serde::{Deserialize, Serialize};
use thronglets_core::HealthCheckConfig;
use thronglets_redis::RedisConfig;
use thronglets_server::{ServerConfig, StorageBackend};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawThrongletsConfig {
    #[serde(default)]
    pub server: RawServerConfig,

    #[serde(default)]
    pub storage: RawStorageConfig,

    #[serde(default)]
    pub health: RawHealthConfig,
}

/// Server config as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStorageConfig {
    #[serde(rename = "type")]
    pub kind: Option<StorageType>,

    #[serde(default)]
    pub redis: RawRedisConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRedisConfig {
    pub url: Option<String>,
    pub db: Option<i64>,
    pub prefix: Option<String>,
    pub agent_ttl_secs: Option<u64>,
    pub task_ttl_secs: Option<u64>,
    pub message_ttl_secs: Option<u64>,
    pub app_ttl_secs: Option<u64>,
    #[serde(default, with = "humantime_serde")]
    pub socket_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHealthConfig {
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub unhealthy_threshold: Option<u32>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ThrongletsConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub health: HealthCheckConfig,
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown storage type '{other}' (expected memory or redis)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(rename = "type", default)]
    pub kind: StorageType,

    /// Used when `type = "redis"`
    #[serde(default)]
    pub redis: RedisConfig,
}

impl StorageConfig {
    pub fn backend(&self) -> StorageBackend {
        match self.kind {
            StorageType::Memory => StorageBackend::Memory,
            StorageType::Redis => StorageBackend::Redis(self.redis.clone()),
        }
    }
}
