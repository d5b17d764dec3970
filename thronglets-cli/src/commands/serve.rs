//! Serve command: runs the service bus HTTP server in the foreground

use anyhow::Result;
use clap::Args;
use thronglets_server::ThrongletsServer;
use tracing::info;

use crate::config::{ConfigLoader, StorageType, ThrongletsConfig};

/// Arguments for the serve command. Flags override configuration.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Storage backend
    #[arg(long, value_enum)]
    pub storage: Option<StorageType>,

    /// Redis connection URL, used with `--storage redis`
    #[arg(long)]
    pub redis_url: Option<String>,
}

impl ServeArgs {
    fn apply(&self, mut config: ThrongletsConfig) -> ThrongletsConfig {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(kind) = self.storage {
            config.storage.kind = kind;
        }
        if let Some(url) = &self.redis_url {
            config.storage.redis.url = url.clone();
        }
        config
    }
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = args.apply(ConfigLoader::load()?);

    info!(
        addr = %config.server.addr(),
        storage = ?config.storage.kind,
        health_interval = ?config.health.interval,
        "Starting thronglets server"
    );

    let server = ThrongletsServer::build(
        config.server,
        &config.storage.backend(),
        config.health,
    )
    .await?;
    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ServeArgs,
    }

    fn parse(argv: &[&str]) -> ServeArgs {
        let mut full = vec!["serve"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn flags_override_config() {
        let args = parse(&[
            "--port",
            "9001",
            "--host",
            "127.0.0.1",
            "--storage",
            "redis",
            "--redis-url",
            "redis://cache:6379",
        ]);
        let config = args.apply(ThrongletsConfig::default());

        assert_eq!(config.server.addr(), "127.0.0.1:9001");
        assert_eq!(config.storage.kind, StorageType::Redis);
        assert_eq!(config.storage.redis.url, "redis://cache:6379");
    }

    #[test]
    fn absent_flags_keep_config() {
        let config = parse(&[]).apply(ThrongletsConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.kind, StorageType::Memory);
    }

    #[test]
    fn unknown_storage_is_rejected() {
        assert!(TestCli::try_parse_from(["serve", "--storage", "postgres"]).is_err());
    }
}
