//! Configuration for the edgeplane control plane.
//!
//! Layered loading (defaults, then TOML file, then `EDGEPLANE_`
//! environment) and translation to `edgeplane_core::ControlPlaneConfig`.
//! The core crate never reads files; the binary loads a [`Config`] here
//! and hands the runtime half to the controller.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edgeplane_core::{ControlPlaneConfig, SyncConfig};

/// Environment prefix. Nested keys use a double underscore:
/// `EDGEPLANE_SYNC__MAX_TRIALS=5`.
pub const ENV_PREFIX: &str = "EDGEPLANE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub rpc: RpcSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSection {
    /// Address the agent listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// JSON inventory loaded at start and saved on shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<PathBuf>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            inventory: None,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8443".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RpcSection {
    /// Timeout for immediate reads (status, logs, trace).
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_rpc_timeout(),
        }
    }
}

fn default_rpc_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueSection {
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_attempts")]
    pub default_attempts: u32,

    /// Finished jobs are forgotten after this long. Zero keeps them.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout(),
            default_attempts: default_attempts(),
            retention_secs: default_retention(),
        }
    }
}

fn default_job_timeout() -> u64 {
    120
}
fn default_attempts() -> u32 {
    1
}
fn default_retention() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncSection {
    /// Seconds between sync passes. Zero disables the background pass.
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_max_trials")]
    pub max_trials: u32,

    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            max_trials: default_max_trials(),
            backoff_initial_secs: default_backoff_initial(),
            backoff_max_secs: default_backoff_max(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_sync_interval() -> u64 {
    60
}
fn default_max_trials() -> u32 {
    3
}
fn default_backoff_initial() -> u64 {
    30
}
fn default_backoff_max() -> u64 {
    15 * 60
}
fn default_query_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogSection {
    #[serde(default)]
    pub format: LogFormat,
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "edgeplane", "edgeplane")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where `serve` keeps its inventory when none is configured.
pub fn default_inventory_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("inventory.json"),
        |dirs| dirs.data_dir().join("inventory.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("edgeplane");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// The layered figment: defaults, then the TOML file at `path` (a
/// missing file is skipped), then the environment.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the config. `path` overrides the platform path.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent
/// directories as needed.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Validation and translation ──────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.rpc.timeout_secs == 0 {
            return Err(ConfigError::invalid("rpc.timeout_secs", "must be at least 1"));
        }
        if self.queue.job_timeout_secs == 0 {
            return Err(ConfigError::invalid("queue.job_timeout_secs", "must be at least 1"));
        }
        if self.queue.default_attempts == 0 {
            return Err(ConfigError::invalid("queue.default_attempts", "must be at least 1"));
        }
        if self.sync.query_timeout_secs == 0 {
            return Err(ConfigError::invalid("sync.query_timeout_secs", "must be at least 1"));
        }
        if self.sync.backoff_initial_secs > self.sync.backoff_max_secs {
            return Err(ConfigError::invalid(
                "sync.backoff_initial_secs",
                format!(
                    "{} exceeds sync.backoff_max_secs ({})",
                    self.sync.backoff_initial_secs, self.sync.backoff_max_secs
                ),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen.parse().map_err(|_| {
            ConfigError::invalid(
                "server.listen",
                format!("expected host:port, got '{}'", self.server.listen),
            )
        })
    }

    /// Inventory path from the config, or the platform default.
    pub fn inventory_path(&self) -> PathBuf {
        self.server
            .inventory
            .clone()
            .unwrap_or_else(default_inventory_path)
    }

    /// Runtime settings for the core controller.
    pub fn to_control_plane_config(&self) -> ControlPlaneConfig {
        ControlPlaneConfig {
            rpc_timeout: Duration::from_secs(self.rpc.timeout_secs),
            job_timeout: Duration::from_secs(self.queue.job_timeout_secs),
            default_attempts: self.queue.default_attempts,
            job_retention: Duration::from_secs(self.queue.retention_secs),
            sync: SyncConfig {
                interval: Duration::from_secs(self.sync.interval_secs),
                max_trials: self.sync.max_trials,
                backoff_initial: Duration::from_secs(self.sync.backoff_initial_secs),
                backoff_max: Duration::from_secs(self.sync.backoff_max_secs),
                query_timeout: Duration::from_secs(self.sync.query_timeout_secs),
            },
        }
    }
}
