// ── Runtime control-plane configuration ──
//
// Tuning knobs for the queue, RPC and sync engine. Core never reads
// config files; edgeplane-config builds a `ControlPlaneConfig` and the
// binary hands it in.

use std::time::Duration;

/// Timeouts and retry policy for every core component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneConfig {
    /// Per-request timeout for immediate reads (status, logs, trace).
    pub rpc_timeout: Duration,
    /// Per-task timeout while delivering a queued job.
    pub job_timeout: Duration,
    /// Attempts a job gets when the intent does not say otherwise.
    pub default_attempts: u32,
    /// How long finished jobs stay queryable. Zero keeps them forever.
    pub job_retention: Duration,
    pub sync: SyncConfig,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(120),
            default_attempts: 1,
            job_retention: Duration::from_secs(24 * 60 * 60),
            sync: SyncConfig::default(),
        }
    }
}

/// Drift detection and repair policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Time between sync passes. Zero disables the background pass.
    pub interval: Duration,
    /// Full-sync jobs dispatched before a device is flagged `not-synced`.
    pub max_trials: u32,
    /// Backoff before the second trial; doubles per trial.
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Timeout for the fingerprint query.
    pub query_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_trials: 3,
            backoff_initial: Duration::from_secs(30),
            backoff_max: Duration::from_secs(15 * 60),
            query_timeout: Duration::from_secs(10),
        }
    }
}
