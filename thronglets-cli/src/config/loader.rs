use super::types::{
    RawHealthConfig, RawRedisConfig, RawServerConfig, RawStorageConfig, RawThrongletsConfig,
    StorageConfig, ThrongletsConfig,
};
use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thronglets_core::HealthCheckConfig;
use thronglets_redis::RedisConfig;
use thronglets_server::ServerConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user file, project file, environment)
    pub fn load() -> Result<ThrongletsConfig> {
        let mut raw = RawThrongletsConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        // Layer 3: Environment
        let env = Self::env_layer(|key| std::env::var(key).ok())?;
        raw = Self::merge_raw(raw, env);

        Ok(Self::finalize(raw))
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "thronglets").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with THRONGLETS_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("THRONGLETS_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".thronglets/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawThrongletsConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config in {}", path.display()))
    }

    /// Build a config layer from `THRONGLETS_*` variables
    fn env_layer(get: impl Fn(&str) -> Option<String>) -> Result<RawThrongletsConfig> {
        fn parse<T: FromStr>(
            get: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Result<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            get(key)
                .map(|value| {
                    value
                        .parse::<T>()
                        .map_err(|e| anyhow!("invalid {key}={value}: {e}"))
                })
                .transpose()
        }

        let mut raw = RawThrongletsConfig::default();
        raw.server.host = get("THRONGLETS_HOST");
        raw.server.port = parse(&get, "THRONGLETS_PORT")?;
        raw.storage.kind = parse(&get, "THRONGLETS_STORAGE_TYPE")?;
        raw.storage.redis.url = get("THRONGLETS_REDIS_URL");
        raw.storage.redis.db = parse(&get, "THRONGLETS_REDIS_DB")?;
        raw.storage.redis.prefix = get("THRONGLETS_REDIS_PREFIX");
        Ok(raw)
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawThrongletsConfig, overlay: RawThrongletsConfig) -> RawThrongletsConfig {
        let (b, o) = (base.storage.redis, overlay.storage.redis);
        RawThrongletsConfig {
            server: RawServerConfig {
                host: overlay.server.host.or(base.server.host),
                port: overlay.server.port.or(base.server.port),
            },
            storage: RawStorageConfig {
                kind: overlay.storage.kind.or(base.storage.kind),
                redis: RawRedisConfig {
                    url: o.url.or(b.url),
                    db: o.db.or(b.db),
                    prefix: o.prefix.or(b.prefix),
                    agent_ttl_secs: o.agent_ttl_secs.or(b.agent_ttl_secs),
                    task_ttl_secs: o.task_ttl_secs.or(b.task_ttl_secs),
                    message_ttl_secs: o.message_ttl_secs.or(b.message_ttl_secs),
                    app_ttl_secs: o.app_ttl_secs.or(b.app_ttl_secs),
                    socket_timeout: o.socket_timeout.or(b.socket_timeout),
                },
            },
            health: RawHealthConfig {
                interval: overlay.health.interval.or(base.health.interval),
                timeout: overlay.health.timeout.or(base.health.timeout),
                unhealthy_threshold: overlay
                    .health
                    .unhealthy_threshold
                    .or(base.health.unhealthy_threshold),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawThrongletsConfig) -> ThrongletsConfig {
        let server_defaults = ServerConfig::default();
        let redis_defaults = RedisConfig::default();
        let health_defaults = HealthCheckConfig::default();
        let redis = raw.storage.redis;

        ThrongletsConfig {
            server: ServerConfig {
                host: raw.server.host.unwrap_or(server_defaults.host),
                port: raw.server.port.unwrap_or(server_defaults.port),
            },
            storage: StorageConfig {
                kind: raw.storage.kind.unwrap_or_default(),
                redis: RedisConfig {
                    url: redis.url.unwrap_or(redis_defaults.url),
                    db: redis.db.unwrap_or(redis_defaults.db),
                    prefix: redis.prefix.unwrap_or(redis_defaults.prefix),
                    agent_ttl_secs: redis.agent_ttl_secs.unwrap_or(redis_defaults.agent_ttl_secs),
                    task_ttl_secs: redis.task_ttl_secs.unwrap_or(redis_defaults.task_ttl_secs),
                    message_ttl_secs: redis
                        .message_ttl_secs
                        .unwrap_or(redis_defaults.message_ttl_secs),
                    app_ttl_secs: redis.app_ttl_secs.unwrap_or(redis_defaults.app_ttl_secs),
                    socket_timeout: redis.socket_timeout.unwrap_or(redis_defaults.socket_timeout),
                },
            },
            health: HealthCheckConfig::default()
                .with_interval(raw.health.interval.unwrap_or(health_defaults.interval))
                .with_timeout(raw.health.timeout.unwrap_or(health_defaults.timeout))
                .with_unhealthy_threshold(
                    raw.health
                        .unhealthy_threshold
                        .unwrap_or(health_defaults.unhealthy_threshold),
                ),
        }
    }

    /// Load config from a specific path (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<ThrongletsConfig> {
        if path.exists() {
            Ok(Self::finalize(Self::read_raw(path)?))
        } else {
            Ok(ThrongletsConfig::default())
        }
    }
}
