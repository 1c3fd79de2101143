//! infragraph configuration (`config.toml`)

use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the config file inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// The unified infragraph configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfragraphConfig {
    /// Where the resource graph lives
    #[serde(default)]
    pub store: StoreConfig,

    /// Change execution engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Container reconciliation
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Timer intervals
    #[serde(default)]
    pub timers: TimersConfig,

    /// Range unix user ids are allocated from
    #[serde(default)]
    pub unix_ids: UnixIdsConfig,
}

impl InfragraphConfig {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join(CONFIG_FILE))
    }

    /// Load the config, falling back to defaults when the file is missing
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            log::debug!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Could not read config file: {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Invalid TOML format in infragraph config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackendKind::Sqlite && self.store.path.is_empty() {
            anyhow::bail!("[store] path is required for the sqlite backend");
        }
        if self.engine.max_consecutive_failures == 0 {
            anyhow::bail!("[engine] max_consecutive_failures must be at least 1");
        }
        if self.reconcile.jobs == 0 {
            anyhow::bail!("[reconcile] jobs must be at least 1");
        }
        if self.reconcile.machine.trim().is_empty() {
            anyhow::bail!("[reconcile] machine must not be empty");
        }
        if self.timers.certificate_renewal_secs == 0 {
            anyhow::bail!("[timers] certificate_renewal_secs must be at least 1");
        }
        if self.timers.validity_months == 0 {
            anyhow::bail!("[timers] validity_months must be at least 1");
        }
        if self.unix_ids.range_start > self.unix_ids.range_end {
            anyhow::bail!(
                "[unix_ids] range_start ({}) is after range_end ({})",
                self.unix_ids.range_start,
                self.unix_ids.range_end
            );
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,

    /// SQLite database file; `~` and variables are expanded
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::default(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub fn expanded_path(&self) -> PathBuf {
        paths::expand(&self.path)
    }
}

fn default_store_path() -> String {
    format!("{}/graph.db", state_dir_string())
}

fn state_dir_string() -> String {
    paths::state_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "~/.local/state/infragraph".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_failures(),
        }
    }
}

fn default_max_failures() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Containers converged in parallel per dependency level
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Machine whose applications this process converges
    #[serde(default = "default_machine")]
    pub machine: String,

    /// Root of relative volume paths
    #[serde(default = "default_volumes_root")]
    pub volumes_root: String,

    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Network every container joins
    #[serde(default)]
    pub network: Option<String>,

    /// Remove containers nothing declares
    #[serde(default = "default_true")]
    pub prune: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            machine: default_machine(),
            volumes_root: default_volumes_root(),
            start_timeout_secs: default_start_timeout(),
            network: None,
            prune: true,
        }
    }
}

impl ReconcileConfig {
    pub fn expanded_volumes_root(&self) -> PathBuf {
        paths::expand(&self.volumes_root)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

fn default_jobs() -> usize {
    4
}

fn default_machine() -> String {
    "localhost".to_string()
}

fn default_volumes_root() -> String {
    format!("{}/volumes", state_dir_string())
}

fn default_start_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimersConfig {
    #[serde(default = "default_renewal_secs")]
    pub certificate_renewal_secs: u64,

    /// Renew self-signed certificates ending within this many days
    #[serde(default = "default_renew_before")]
    pub renew_before_days: i64,

    /// Validity of a renewed certificate
    #[serde(default = "default_validity")]
    pub validity_months: u32,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            certificate_renewal_secs: default_renewal_secs(),
            renew_before_days: default_renew_before(),
            validity_months: default_validity(),
        }
    }
}

fn default_renewal_secs() -> u64 {
    3600
}

fn default_renew_before() -> i64 {
    7
}

fn default_validity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixIdsConfig {
    #[serde(default = "default_uid_start")]
    pub range_start: i64,
    #[serde(default = "default_uid_end")]
    pub range_end: i64,
    #[serde(default = "default_window")]
    pub window_size: i64,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

impl Default for UnixIdsConfig {
    fn default() -> Self {
        Self {
            range_start: default_uid_start(),
            range_end: default_uid_end(),
            window_size: default_window(),
            ttl_secs: default_ttl(),
        }
    }
}

fn default_uid_start() -> i64 {
    2000
}

fn default_uid_end() -> i64 {
    59_999
}

fn default_window() -> i64 {
    100
}

fn default_ttl() -> u64 {
    30
}

// ============================================================================
// Tests
// ============================================================================
