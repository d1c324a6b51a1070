use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cadence_core::CadenceClient;
use tracing::{info, warn};
use url::Url;

use crate::storage::{CredentialError, CredentialStore};
use crate::sync::executor::SyncExecutor;
use crate::sync::retry::RetryPolicy;
use crate::sync::scheduler::{AlwaysOnline, Connectivity, SyncScheduler, TcpReachability};
use crate::sync::store::LocalStore;
use crate::sync::summary::{SyncStatusSummary, status_summary};
use crate::sync::telemetry::TelemetryStore;

const DEFAULT_API_URL: &str = "https://api.cadence.run";
const DATA_DIR_NAME: &str = "cadence";
const DATABASE_FILENAME: &str = "cadence.db";
const TELEMETRY_FILENAME: &str = "sync_telemetry.bin";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_url: Url,
    /// Overrides the keyring token when set.
    pub token: Option<String>,
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub sync_on_start: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let api_url = std::env::var("CADENCE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let api_url =
            Url::parse(&api_url).with_context(|| format!("invalid CADENCE_API_URL: {api_url}"))?;
        let token = std::env::var("CADENCE_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let data_dir = std::env::var("CADENCE_DATA_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_data_dir);
        let sync_interval = Duration::from_secs(read_u64_env(
            "CADENCE_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
        ));
        let sync_on_start = read_bool_env("CADENCE_SYNC_ON_START", true);

        Ok(Self {
            api_url,
            token,
            data_dir,
            sync_interval,
            sync_on_start,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILENAME)
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.data_dir.join(TELEMETRY_FILENAME)
    }
}

/// Local side of the engine: the record store and the telemetry file.
pub struct LocalState {
    pub store: LocalStore,
    pub telemetry: Arc<TelemetryStore>,
}

impl LocalState {
    pub async fn open(config: &DaemonConfig, credentials: &CredentialStore) -> anyhow::Result<Self> {
        let store = LocalStore::open(&config.database_path())
            .await
            .with_context(|| format!("failed to open local store at {:?}", config.database_path()))?;
        let secret = credentials
            .telemetry_secret()
            .context("failed to load telemetry secret")?;
        let telemetry = TelemetryStore::open(config.telemetry_path(), &secret)
            .context("failed to open telemetry store")?;
        Ok(Self {
            store,
            telemetry: Arc::new(telemetry),
        })
    }

    pub async fn status(&self) -> anyhow::Result<SyncStatusSummary> {
        status_summary(&self.store, &self.telemetry)
            .await
            .context("failed to read sync status")
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    state: LocalState,
    scheduler: Arc<SyncScheduler>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let credentials = CredentialStore::new().context("failed to open keyring")?;
        Self::bootstrap_with(config, &credentials).await
    }

    pub async fn bootstrap_with(
        config: DaemonConfig,
        credentials: &CredentialStore,
    ) -> anyhow::Result<Self> {
        let state = LocalState::open(&config, credentials).await?;
        let reset = state.store.reset_interrupted_uploads().await?;
        if reset > 0 {
            warn!(reset, "uploads interrupted by a previous run marked as failed");
        }

        let token = resolve_token(&config, credentials)?;
        let client = CadenceClient::with_base_url(config.api_url.as_str(), token)?;
        let executor = Arc::new(SyncExecutor::new(
            state.store.clone(),
            Arc::new(client),
            Arc::clone(&state.telemetry),
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            executor,
            connectivity_for(&config.api_url),
            RetryPolicy::default(),
            config.sync_interval,
        ));

        Ok(Self {
            config,
            state,
            scheduler,
        })
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            api_url = %self.config.api_url,
            data_dir = %self.config.data_dir.display(),
            interval_secs = self.config.sync_interval.as_secs(),
            "cadenced started"
        );

        self.scheduler.schedule_recurring();
        if self.config.sync_on_start {
            self.scheduler.request_immediate();
        }
        let scheduler_handle = tokio::spawn(Arc::clone(&self.scheduler).run());

        let signal = tokio::signal::ctrl_c().await;
        info!("shutting down, waiting for the running sync pass");
        self.scheduler.shutdown().await;
        scheduler_handle
            .await
            .context("sync scheduler task failed")?;
        signal.context("failed waiting for shutdown signal")?;
        Ok(())
    }

    /// Runs one immediate pass in the foreground and returns the resulting status.
    pub async fn sync_now(&self) -> anyhow::Result<SyncStatusSummary> {
        self.scheduler.request_immediate();
        if self.scheduler.run_ready().await == 0 {
            warn!("server unreachable, sync skipped");
            self.scheduler.cancel_all();
        }
        self.state.status().await
    }

    pub async fn status(&self) -> anyhow::Result<SyncStatusSummary> {
        self.state.status().await
    }

    /// Signs out of a live runtime. Pending triggers are dropped first so no
    /// new pass starts; a pass already running finishes with its own token.
    pub fn logout(&self, credentials: &CredentialStore) -> anyhow::Result<()> {
        self.scheduler.cancel_all();
        self.state
            .telemetry
            .clear()
            .context("failed to remove telemetry")?;
        delete_credentials(credentials)
    }
}

/// Removes everything tied to the signed-in user except the local records.
pub fn logout(config: &DaemonConfig, credentials: &CredentialStore) -> anyhow::Result<()> {
    TelemetryStore::remove(&config.telemetry_path()).context("failed to remove telemetry")?;
    delete_credentials(credentials)
}

fn delete_credentials(credentials: &CredentialStore) -> anyhow::Result<()> {
    credentials
        .delete_token()
        .context("failed to delete API token")?;
    credentials
        .delete_telemetry_secret()
        .context("failed to delete telemetry secret")?;
    Ok(())
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
