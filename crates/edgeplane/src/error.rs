//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError`, `ConfigError` and transport errors into user-facing
//! errors with actionable help text.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use edgeplane_config::ConfigError;
use edgeplane_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Listener ─────────────────────────────────────────────────────
    #[error("Could not listen for agents on {addr}")]
    #[diagnostic(
        code(edgeplane::bind_failed),
        help(
            "Check that no other process holds the port.\n\
             Change it with --listen or `listen` under [server] in the config file."
        )
    )]
    BindFailed {
        addr: String,
        #[source]
        source: edgeplane_api::Error,
    },

    #[error("Device {machine_id} is not reachable")]
    #[diagnostic(
        code(edgeplane::unreachable),
        help("The device's agent is not connected. Jobs stay queued until it reconnects.")
    )]
    Unreachable { machine_id: String },

    #[error("Device did not answer within {seconds}s")]
    #[diagnostic(
        code(edgeplane::timeout),
        help("Raise `timeout_secs` under [rpc] or check the device's agent.")
    )]
    Timeout { seconds: u64 },

    // ── Documents ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(edgeplane::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("Conflict: {reason}")]
    #[diagnostic(code(edgeplane::conflict))]
    Conflict { reason: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(edgeplane::validation))]
    Validation { field: String, reason: String },

    #[error("{path}: {reason}")]
    #[diagnostic(
        code(edgeplane::rejected),
        help("Fix the device document and run `edgeplane validate` again.")
    )]
    Rejected { path: String, reason: String },

    #[error("Agent reported failure: {message}")]
    #[diagnostic(code(edgeplane::agent_error))]
    Agent { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {}", path.display())]
    #[diagnostic(
        code(edgeplane::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: PathBuf },

    #[error(transparent)]
    #[diagnostic(
        code(edgeplane::config),
        help("Check the config file (see `edgeplane config path`) and EDGEPLANE_* variables.")
    )]
    Config(#[from] ConfigError),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(edgeplane::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error("Could not read {}", path.display())]
    #[diagnostic(code(edgeplane::io))]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in {}: {source}", path.display())]
    #[diagnostic(code(edgeplane::json), help("Check the JSON file contents and try again."))]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not render output: {0}")]
    #[diagnostic(code(edgeplane::render))]
    Render(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } | Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Rejected { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { reason } => CliError::Validation {
                field: "intent".into(),
                reason,
            },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                resource_type: entity_type,
                identifier,
            },
            CoreError::Conflict { reason } => CliError::Conflict { reason },
            CoreError::DeviceUnreachable { machine_id } => CliError::Unreachable { machine_id },
            CoreError::TransportTimeout { timeout_ms, .. } => CliError::Timeout {
                seconds: timeout_ms.div_ceil(1000),
            },
            CoreError::AgentError { message } => CliError::Agent { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::ControlPlaneStopped => {
                CliError::Internal("control plane is not running".into())
            }
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
