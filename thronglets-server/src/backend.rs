//! Storage backend selection.

use std::sync::Arc;

use thronglets_core::{InMemoryStorage, Storage};
use thronglets_redis::{RedisConfig, RedisStorage};
use tracing::info;

use crate::ServerError;

/// Which [`Storage`] implementation the server runs on.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StorageBackend {
    /// Volatile, process-local storage
    #[default]
    Memory,
    /// Redis with the given connection settings
    Redis(RedisConfig),
}

impl StorageBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis(_) => "redis",
        }
    }

    /// Construct and connect the backend.
    pub async fn build(&self) -> Result<Arc<dyn Storage>, ServerError> {
        let storage: Arc<dyn Storage> = match self {
            Self::Memory => Arc::new(InMemoryStorage::new()),
            Self::Redis(config) => Arc::new(RedisStorage::new(config.clone())),
        };
        storage.connect().await?;
        info!(backend = storage.name(), "Storage backend ready");
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_connected() {
        let storage = StorageBackend::Memory.build().await.unwrap();
        assert_eq!(storage.name(), "memory");
        assert!(storage.is_connected().await);
    }

    #[test]
    fn backend_names() {
        assert_eq!(StorageBackend::default().name(), "memory");
        assert_eq!(
            StorageBackend::Redis(RedisConfig::default()).name(),
            "redis"
        );
    }
}
