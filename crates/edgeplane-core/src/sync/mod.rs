// ── Device sync engine ──
//
// Periodically compares each approved device's configuration
// fingerprint with the one the control plane expects, and dispatches a
// full sync job when they drift apart. Repair attempts are bounded and
// spaced by an exponential backoff; once exhausted the device is
// flagged `not-synced` for an operator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edgeplane_api::AgentTransport;
use futures_util::future::join_all;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::dispatch::{Dispatcher, desired_config, fingerprint_query};
use crate::model::{Device, SyncState, SyncStatus};
use crate::queue::JobQueue;
use crate::store::DataStore;

/// SHA-256 (lowercase hex) of the serialized desired configuration.
pub fn fingerprint(desired: &Value) -> String {
    let digest = Sha256::digest(desired.to_string().as_bytes());
    format!("{digest:x}")
}

/// Wait before the next repair attempt after `trials` attempts.
///
/// `delay = min(initial * 2^(trials - 1), max)`, spread by a
/// deterministic +-25% jitter so devices that drifted together do not
/// all retry on the same pass.
pub(crate) fn backoff(trials: u32, config: &SyncConfig) -> Duration {
    if trials == 0 {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(trials - 1).unwrap_or(i32::MAX);
    let base = config.backoff_initial.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.backoff_max.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(trials) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

/// Tally of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub checked: usize,
    pub synced: usize,
    pub syncing: usize,
    pub not_synced: usize,
    pub unknown: usize,
    /// Full sync jobs queued during the pass.
    pub dispatched: usize,
}

impl SyncReport {
    fn record(&mut self, status: SyncStatus, dispatched: bool) {
        self.checked += 1;
        match status {
            SyncStatus::Synced => self.synced += 1,
            SyncStatus::Syncing => self.syncing += 1,
            SyncStatus::NotSynced => self.not_synced += 1,
            SyncStatus::Unknown => self.unknown += 1,
        }
        if dispatched {
            self.dispatched += 1;
        }
    }
}

pub struct SyncEngine {
    store: Arc<DataStore>,
    transport: Arc<dyn AgentTransport>,
    queue: JobQueue,
    dispatcher: Arc<Dispatcher>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<DataStore>,
        transport: Arc<dyn AgentTransport>,
        queue: JobQueue,
        dispatcher: Arc<Dispatcher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            queue,
            dispatcher,
            config,
        }
    }

    /// Check every approved device concurrently.
    pub async fn sync_pass(&self) -> SyncReport {
        let devices = self.store.devices_snapshot();
        let checks = devices
            .iter()
            .filter(|d| d.is_approved)
            .map(|d| self.check_device(d));
        let results = join_all(checks).await;

        let mut report = SyncReport::default();
        for (status, dispatched) in results {
            report.record(status, dispatched);
        }
        info!(
            checked = report.checked,
            synced = report.synced,
            drifting = report.syncing + report.not_synced,
            unknown = report.unknown,
            dispatched = report.dispatched,
            "sync pass finished"
        );
        report
    }

    /// Check one device and record its new sync state. Returns the
    /// state and whether a sync job was queued.
    pub async fn check_device(&self, device: &Device) -> (SyncStatus, bool) {
        if !self.transport.is_connected(&device.machine_id) {
            self.set_state(device, SyncStatus::Unknown, None);
            return (SyncStatus::Unknown, false);
        }

        let tunnels = self.store.active_tunnels_for_device(&device.id);
        let expected = fingerprint(&desired_config(device, &tunnels));

        let Some(reported) = self.query_fingerprint(device).await else {
            self.set_state(device, SyncStatus::Unknown, Some(expected));
            return (SyncStatus::Unknown, false);
        };

        if reported == expected {
            self.store.update_sync(&device.id, |s| {
                s.state = SyncStatus::Synced;
                s.trials = 0;
                s.hash = expected;
            });
            return (SyncStatus::Synced, false);
        }

        debug!(device_id = %device.id, %expected, %reported, "configuration drift");
        if self.queue.has_outstanding(&device.machine_id, None) {
            self.set_state(device, SyncStatus::Syncing, Some(expected));
            return (SyncStatus::Syncing, false);
        }

        let sync = &device.sync;
        if !sync.auto_sync {
            self.set_state(device, SyncStatus::NotSynced, Some(expected));
            return (SyncStatus::NotSynced, false);
        }
        if sync.trials >= self.config.max_trials {
            if sync.state != SyncStatus::NotSynced {
                warn!(
                    device_id = %device.id,
                    trials = sync.trials,
                    "sync attempts exhausted, operator action needed"
                );
            }
            self.set_state(device, SyncStatus::NotSynced, Some(expected));
            return (SyncStatus::NotSynced, false);
        }
        if !self.backoff_elapsed(sync) {
            self.set_state(device, SyncStatus::Syncing, Some(expected));
            return (SyncStatus::Syncing, false);
        }

        let trial = sync.trials + 1;
        self.store.update_sync(&device.id, |s| {
            s.state = SyncStatus::Syncing;
            s.trials = trial;
            s.hash = expected;
            s.last_attempt = Some(Utc::now());
        });
        let job_id = self.dispatcher.submit_sync_job(device);
        info!(device_id = %device.id, job_id = %job_id, trial, "full sync dispatched");
        (SyncStatus::Syncing, true)
    }

    async fn query_fingerprint(&self, device: &Device) -> Option<String> {
        let reply = match self
            .transport
            .send(&device.machine_id, fingerprint_query(), self.config.query_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "fingerprint query failed");
                return None;
            }
        };
        if !reply.ok {
            warn!(device_id = %device.id, reason = %reply.message_text(), "agent refused fingerprint query");
            return None;
        }
        match &reply.message {
            Value::String(hash) => Some(hash.clone()),
            // A null hash means the agent holds no configuration yet.
            other => other
                .get("hash")
                .map(|h| h.as_str().unwrap_or_default().to_owned()),
        }
    }

    fn backoff_elapsed(&self, sync: &SyncState) -> bool {
        let Some(last) = sync.last_attempt else {
            return true;
        };
        let wait = backoff(sync.trials, &self.config);
        let since = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
        since >= wait
    }

    fn set_state(&self, device: &Device, state: SyncStatus, hash: Option<String>) {
        self.store.update_sync(&device.id, |s| {
            s.state = state;
            if let Some(hash) = hash {
                s.hash = hash;
            }
        });
    }
}
