//! App registry and the health-check state machine.
//!
//! Apps are never expired. A background pass probes every registered app and
//! flips `healthy` after `unhealthy_threshold` consecutive failures; one
//! success flips it back. Failure counters live in this process only and
//! start from zero after a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::health::{HealthCheckConfig, HealthProbe, HttpHealthProbe};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{AppCard, AppId, RegisteredApp};

/// Lower bound on the time between health check passes.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Registers apps and tracks their health.
pub struct AppRegistry {
    storage: Arc<dyn Storage>,
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
    failures: Mutex<HashMap<AppId, u32>>,
}

impl AppRegistry {
    /// Registry that probes over HTTP.
    pub fn new(storage: Arc<dyn Storage>, config: HealthCheckConfig) -> Self {
        Self::with_probe(storage, Arc::new(HttpHealthProbe::new()), config)
    }

    pub fn with_probe(
        storage: Arc<dyn Storage>,
        probe: Arc<dyn HealthProbe>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            storage,
            probe,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Register a card. An app with the same name is replaced in place and
    /// comes back healthy with its failure count cleared.
    #[instrument(name = "app::register", skip(self, card), fields(name = %card.name))]
    pub async fn register(&self, card: AppCard) -> Result<RegisteredApp> {
        if let Some(mut existing) = self.storage.find_app_by_name(&card.name).await? {
            existing.card = card;
            existing.healthy = true;
            existing.mark_seen();
            self.failures.lock().await.remove(&existing.app_id);
            let app = self.storage.register_app(existing).await?;
            debug!(app_id = %app.app_id, "Renewed app registration");
            return Ok(app);
        }

        let app = self.storage.register_app(RegisteredApp::new(card)).await?;
        info!(app_id = %app.app_id, "Registered app");
        Ok(app)
    }

    pub async fn get(&self, app_id: &AppId) -> Result<RegisteredApp> {
        self.storage
            .get_app(app_id)
            .await?
            .ok_or_else(|| Error::app_not_found(app_id))
    }

    pub async fn list(&self, healthy_only: bool) -> Result<Vec<RegisteredApp>> {
        self.storage.list_apps(healthy_only).await
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<RegisteredApp>> {
        self.storage.find_app_by_name(name).await
    }

    /// Replace the card of an existing app.
    #[instrument(name = "app::update", skip(self, app_id, card), fields(app_id = %app_id))]
    pub async fn update(&self, app_id: &AppId, card: AppCard) -> Result<RegisteredApp> {
        let mut app = self.get(app_id).await?;
        app.card = card;
        app.mark_seen();
        self.failures.lock().await.remove(app_id);
        let app = self.storage.update_app(app).await?;
        info!("Updated app");
        Ok(app)
    }

    #[instrument(name = "app::delete", skip(self, app_id), fields(app_id = %app_id))]
    pub async fn delete(&self, app_id: &AppId) -> Result<()> {
        if !self.storage.delete_app(app_id).await? {
            return Err(Error::app_not_found(app_id));
        }
        self.failures.lock().await.remove(app_id);
        info!("Deleted app");
        Ok(())
    }

    /// Current consecutive failure count for an app.
    pub async fn failure_count(&self, app_id: &AppId) -> u32 {
        self.failures.lock().await.get(app_id).copied().unwrap_or(0)
    }

    /// Probe every registered app once and apply the results.
    pub async fn check_health_once(&self) -> Result<()> {
        let apps = self.storage.list_apps(false).await?;
        debug!(count = apps.len(), "Running app health checks");

        for app in apps {
            let app_id = app.app_id.clone();
            if let Err(e) = self.check_app(app).await {
                warn!(app_id = %app_id, error = %e, "Failed to record app health");
            }
        }
        Ok(())
    }

    async fn check_app(&self, app: RegisteredApp) -> Result<()> {
        let ok = self
            .probe
            .probe(&app.card.health_check_url, self.config.timeout)
            .await;

        // The probe may have raced a delete or re-registration; apply to the latest record.
        let Some(mut current) = self.storage.get_app(&app.app_id).await? else {
            self.failures.lock().await.remove(&app.app_id);
            return Ok(());
        };

        if ok {
            self.failures.lock().await.remove(&current.app_id);
            if !current.healthy {
                info!(app_id = %current.app_id, name = %current.card.name, "App recovered");
                current.healthy = true;
            }
            current.mark_seen();
            return self.persist(current).await;
        }

        let failures = {
            let mut counters = self.failures.lock().await;
            let count = counters.entry(current.app_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if failures >= self.config.unhealthy_threshold && current.healthy {
            warn!(
                app_id = %current.app_id,
                name = %current.card.name,
                failures,
                "App marked unhealthy"
            );
            current.healthy = false;
            return self.persist(current).await;
        }

        debug!(app_id = %current.app_id, failures, "App health probe failed");
        Ok(())
    }

    async fn persist(&self, app: RegisteredApp) -> Result<()> {
        match self.storage.update_app(app).await {
            Ok(_) | Err(Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run health checks on start and then every `interval` until
    /// `shutdown` is cancelled.
    pub fn spawn_health_monitor(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval = ?self.config.interval,
                threshold = self.config.unhealthy_threshold,
                "App health monitor started"
            );
            let mut ticker = tokio::time::interval(self.config.interval.max(MIN_CHECK_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.check_health_once().await {
                            warn!(error = %e, "App health check pass failed");
                        }
                    }
                }
            }
            info!("App health monitor stopped");
        })
    }
}
