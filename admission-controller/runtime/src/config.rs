use crate::core::{Credentials, PolicySelector, ValidatorConfig};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time;
use tracing::{debug, info, warn};

/// The controller configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub validator: ValidatorConfig,

    /// Evaluated in order; the first match applies.
    #[serde(default)]
    pub policy_selectors: Vec<PolicySelector>,
}

/// A consistent view of the configuration and credentials files.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub config: ControllerConfig,
    pub credentials: Credentials,
}

/// The current snapshot. Readers clone the inner `Arc` and release the lock
/// immediately; reloads replace it wholesale.
pub type SharedSnapshot = Arc<RwLock<Arc<Snapshot>>>;

/// Polls the configuration and credentials files and publishes a new snapshot
/// whenever either changes.
#[derive(Debug)]
pub struct Reloader {
    config: WatchedFile,
    credentials: WatchedFile,
    snapshot: SharedSnapshot,
}

#[derive(Debug)]
struct WatchedFile {
    path: PathBuf,
    last: Option<Vec<u8>>,
}

// === impl ControllerConfig ===

impl ControllerConfig {
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(bytes).context("invalid controller configuration")
    }
}

/// Parses a credentials file. JSON documents are accepted as well as YAML.
pub fn parse_credentials(bytes: &[u8]) -> Result<Credentials> {
    serde_yaml::from_slice(bytes).context("invalid credentials")
}

// === impl Snapshot ===

impl Snapshot {
    pub fn shared(self) -> SharedSnapshot {
        Arc::new(RwLock::new(Arc::new(self)))
    }
}

// === impl Reloader ===

impl Reloader {
    /// Reads both files and returns the initial snapshot along with a reloader
    /// that keeps it current. Unlike reloads, the initial load fails if either
    /// file cannot be read or parsed.
    pub async fn load(
        config: impl Into<PathBuf>,
        credentials: impl Into<PathBuf>,
    ) -> Result<(SharedSnapshot, Self)> {
        let mut config = WatchedFile::new(config.into());
        let mut credentials = WatchedFile::new(credentials.into());

        let snapshot = Snapshot {
            config: ControllerConfig::from_yaml(&config.read_initial().await?)?,
            credentials: parse_credentials(&credentials.read_initial().await?)?,
        };
        info!(
            selectors = snapshot.config.policy_selectors.len(),
            users = snapshot.credentials.users.len(),
            "Loaded configuration"
        );

        let snapshot = snapshot.shared();
        let reloader = Self {
            config,
            credentials,
            snapshot: snapshot.clone(),
        };
        Ok((snapshot, reloader))
    }

    /// Checks both files every `interval`, forever.
    pub async fn run(mut self, interval: time::Duration) {
        let mut interval = time::interval(interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately and the files were just read.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.reload().await;
        }
    }

    /// Re-reads both files, publishing a new snapshot if either changed and
    /// parsed successfully. A file that fails to parse leaves its part of the
    /// snapshot unchanged.
    pub async fn reload(&mut self) -> bool {
        let mut next = (**self.snapshot.read()).clone();
        let mut updated = false;

        if let Some(bytes) = self.config.changed().await {
            match ControllerConfig::from_yaml(&bytes) {
                Ok(config) => {
                    info!(
                        path = %self.config.path.display(),
                        selectors = config.policy_selectors.len(),
                        "Reloaded configuration"
                    );
                    next.config = config;
                    updated = true;
                }
                Err(error) => {
                    warn!(
                        path = %self.config.path.display(),
                        "{error:#}; keeping previous configuration"
                    );
                }
            }
        }

        if let Some(bytes) = self.credentials.changed().await {
            match parse_credentials(&bytes) {
                Ok(credentials) => {
                    info!(
                        path = %self.credentials.path.display(),
                        users = credentials.users.len(),
                        "Reloaded credentials"
                    );
                    next.credentials = credentials;
                    updated = true;
                }
                Err(error) => {
                    warn!(
                        path = %self.credentials.path.display(),
                        "{error:#}; keeping previous credentials"
                    );
                }
            }
        }

        if updated {
            *self.snapshot.write() = Arc::new(next);
        }
        updated
    }
}

// === impl WatchedFile ===

impl WatchedFile {
    fn new(path: PathBuf) -> Self {
        Self { path, last: None }
    }

    async fn read_initial(&mut self) -> Result<Vec<u8>> {
        let bytes = read(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        self.last = Some(bytes.clone());
        Ok(bytes)
    }

    /// Returns the file's contents if they differ from the last read.
    async fn changed(&mut self) -> Option<Vec<u8>> {
        let bytes = match read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, path = %self.path.display(), "Failed to read file");
                return None;
            }
        };
        if self.last.as_ref() == Some(&bytes) {
            return None;
        }
        debug!(path = %self.path.display(), "File changed");
        self.last = Some(bytes.clone());
        Some(bytes)
    }
}

async fn read(path: &Path) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}
