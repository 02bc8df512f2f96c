// ── Job dispatch ──
//
// Turns validated operator intents into store changes plus queued
// jobs. Dispatch never waits for an agent: it returns as soon as the
// jobs are queued, and the reconciler folds the outcomes back in later.
// Only immediate reads (`fetch`) talk to the agent directly.

mod capabilities;
mod plan;
mod requests;
mod tasks;
mod tunnels;

pub use capabilities::{Capabilities, ModifyShape};
pub use requests::{
    DeviceUpdate, DhcpRequest, Intent, ReadRequest, StaticRouteRequest, TunnelRequest,
};
pub use tasks::desired_config;
pub(crate) use tasks::fingerprint_query;

use std::collections::HashMap;
use std::sync::Arc;

use edgeplane_api::{AgentTransport, AgentVersions, MachineId};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info};

use crate::config::ControlPlaneConfig;
use crate::error::CoreError;
use crate::model::{Device, EntityId, JobId, JobResponse, NewJob, Priority};
use crate::queue::JobQueue;
use crate::store::DataStore;
use plan::Change;

// ── Actors and organizations ───────────────────────────────────────

/// Who is asking, and on behalf of which organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user: String,
    pub org: EntityId,
}

impl Actor {
    pub fn new(user: impl Into<String>, org: impl Into<EntityId>) -> Self {
        Self {
            user: user.into(),
            org: org.into(),
        }
    }
}

/// Resolves which organizations an actor may act on.
pub trait OrgResolver: Send + Sync {
    fn allowed_orgs(&self, actor: &Actor) -> Result<Vec<EntityId>, CoreError>;
}

/// Trusts the organization the actor names.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedOrg;

impl OrgResolver for TrustedOrg {
    fn allowed_orgs(&self, actor: &Actor) -> Result<Vec<EntityId>, CoreError> {
        Ok(vec![actor.org.clone()])
    }
}

/// Fixed user → organizations membership table.
#[derive(Debug, Clone, Default)]
pub struct Memberships {
    members: HashMap<String, Vec<EntityId>>,
}

impl Memberships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user: impl Into<String>, org: impl Into<EntityId>) -> Self {
        self.members.entry(user.into()).or_default().push(org.into());
        self
    }
}

impl OrgResolver for Memberships {
    fn allowed_orgs(&self, actor: &Actor) -> Result<Vec<EntityId>, CoreError> {
        let member = self
            .members
            .get(&actor.user)
            .is_some_and(|orgs| orgs.contains(&actor.org));
        if member {
            Ok(vec![actor.org.clone()])
        } else {
            Err(CoreError::not_found("organization", &actor.org))
        }
    }
}

// ── Outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DispatchStatus {
    /// Jobs queued and every target is connected.
    Queued,
    /// Jobs queued for at least one offline device, or a read that
    /// could not be answered.
    Disconnected,
    /// Nothing to send; the store change (if any) is already done.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub job_ids: Vec<JobId>,
    pub status: DispatchStatus,
    pub message: String,
}

impl DispatchOutcome {
    fn from_jobs(job_ids: Vec<JobId>, offline: usize) -> Self {
        let (status, message) = match (job_ids.len(), offline) {
            (0, _) => (DispatchStatus::Completed, "no changes to send".to_owned()),
            (n, 0) => (DispatchStatus::Queued, format!("{n} job(s) queued")),
            (n, off) => (
                DispatchStatus::Disconnected,
                format!("{n} job(s) queued, {off} device(s) offline; they run on reconnect"),
            ),
        };
        Self {
            job_ids,
            status,
            message,
        }
    }
}

/// Answer to an immediate read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutcome {
    pub status: DispatchStatus,
    pub data: Option<serde_json::Value>,
}

// ── Dispatcher ─────────────────────────────────────────────────────

/// One plan per device, ready to commit.
struct DevicePlan {
    device_id: EntityId,
    change: Change,
    job: Option<NewJob>,
}

pub struct Dispatcher {
    store: Arc<DataStore>,
    queue: JobQueue,
    transport: Arc<dyn AgentTransport>,
    orgs: Arc<dyn OrgResolver>,
    config: ControlPlaneConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<DataStore>,
        queue: JobQueue,
        transport: Arc<dyn AgentTransport>,
        orgs: Arc<dyn OrgResolver>,
        config: ControlPlaneConfig,
    ) -> Self {
        Self {
            store,
            queue,
            transport,
            orgs,
            config,
        }
    }

    /// Apply one intent to every listed device.
    ///
    /// All devices are checked first; if any is rejected nothing is
    /// written and no job exists. Otherwise the store changes commit in
    /// one transaction and the jobs are queued.
    pub fn apply(
        &self,
        devices: &[EntityId],
        intent: &Intent,
        actor: &Actor,
    ) -> Result<DispatchOutcome, CoreError> {
        if devices.is_empty() {
            return Err(CoreError::validation("no devices selected"));
        }
        let allowed = self.orgs.allowed_orgs(actor)?;

        let mut seen = Vec::with_capacity(devices.len());
        let mut plans = Vec::with_capacity(devices.len());
        for id in devices {
            if seen.contains(id) {
                continue;
            }
            seen.push(id.clone());

            let device = self.visible_device(id, &allowed)?;
            if !device.is_approved {
                return Err(CoreError::validation(format!(
                    "device {} is not approved",
                    device.label()
                )));
            }
            let planned = self.plan(&device, intent)?;
            let job = planned.work.map(|(steps, response)| {
                self.new_job(&device, steps, response, Priority::Normal, actor)
            });
            plans.push(DevicePlan {
                device_id: device.id.clone(),
                change: planned.change,
                job,
            });
        }

        self.store.transaction(|tx| {
            for plan in &plans {
                if matches!(plan.change, Change::Nothing) {
                    continue;
                }
                let mut device = tx
                    .device(&plan.device_id)
                    .ok_or_else(|| CoreError::not_found("device", &plan.device_id))?;
                plan.change.apply(&mut device);
                tx.put_device(device);
            }
            Ok::<_, CoreError>(())
        })?;

        let outcome = self.submit_all(plans.into_iter().filter_map(|p| p.job));
        info!(
            user = %actor.user,
            intent = intent_name(intent),
            devices = seen.len(),
            jobs = outcome.job_ids.len(),
            status = %outcome.status,
            "intent dispatched"
        );
        Ok(outcome)
    }

    /// Approve or de-approve a device. De-approval closes its channel.
    pub fn approve(&self, device_id: &EntityId, approved: bool, actor: &Actor) -> Result<(), CoreError> {
        let allowed = self.orgs.allowed_orgs(actor)?;
        let device = self.visible_device(device_id, &allowed)?;
        self.store
            .update_device(device_id, |d| d.is_approved = approved)
            .ok_or_else(|| CoreError::not_found("device", device_id))?;

        info!(device_id = %device_id, approved, user = %actor.user, "device approval changed");
        if !approved {
            self.transport.disconnect(&device.machine_id);
        }
        Ok(())
    }

    /// Delete a device, refusing while any active tunnel uses it. The
    /// organization's device count drops in the same transaction.
    pub fn delete_device(&self, device_id: &EntityId, actor: &Actor) -> Result<(), CoreError> {
        let allowed = self.orgs.allowed_orgs(actor)?;
        let machine_id = self.store.transaction(|tx| {
            let device = tx
                .device(device_id)
                .filter(|d| allowed.contains(&d.org))
                .ok_or_else(|| CoreError::not_found("device", device_id))?;
            let tunnels = tx.active_tunnels_for_device(device_id);
            if let Some(tunnel) = tunnels.first() {
                return Err(CoreError::conflict(format!(
                    "{} still has {} active tunnel(s), starting with tunnel {}",
                    device.label(),
                    tunnels.len(),
                    tunnel.num
                )));
            }
            tx.delete_device(device_id);
            if let Some(mut org) = tx.organization(&device.org) {
                org.device_count = org.device_count.saturating_sub(1);
                tx.put_organization(org);
            }
            Ok(device.machine_id)
        })?;

        let cancelled = self.queue.remove_device_jobs(&machine_id);
        self.transport.disconnect(&machine_id);
        info!(device_id = %device_id, machine_id = %machine_id, cancelled, user = %actor.user, "device deleted");
        Ok(())
    }

    /// Administratively remove a queued or active job.
    pub fn cancel_job(&self, id: JobId, actor: &Actor) -> Result<(), CoreError> {
        let allowed = self.orgs.allowed_orgs(actor)?;
        let job = self
            .queue
            .job(id)
            .filter(|j| allowed.contains(&j.org))
            .ok_or_else(|| CoreError::not_found("job", id))?;
        self.queue.remove(job.id)
    }

    /// Ask a connected agent for live data. Offline devices get a
    /// `disconnected` answer and nothing is queued.
    pub async fn fetch(
        &self,
        device_id: &EntityId,
        request: ReadRequest,
        actor: &Actor,
    ) -> Result<ReadOutcome, CoreError> {
        let allowed = self.orgs.allowed_orgs(actor)?;
        let device = self.visible_device(device_id, &allowed)?;
        if !self.transport.is_connected(&device.machine_id) {
            debug!(device_id = %device_id, "read skipped, device offline");
            return Ok(ReadOutcome {
                status: DispatchStatus::Disconnected,
                data: None,
            });
        }

        let reply = self
            .transport
            .send(&device.machine_id, tasks::read(request), self.config.rpc_timeout)
            .await?;
        if !reply.ok {
            return Err(CoreError::AgentError {
                message: reply.message_text(),
            });
        }
        Ok(ReadOutcome {
            status: DispatchStatus::Completed,
            data: Some(reply.message),
        })
    }

    /// Queue a low-priority full sync for the sync engine.
    pub(crate) fn submit_sync_job(&self, device: &Device) -> JobId {
        let job = self.new_job(
            device,
            vec![tasks::sync_device(self.desired_for(device))],
            JobResponse::Sync {
                device_id: device.id.clone(),
            },
            Priority::Low,
            &Actor::new("sync", device.org.clone()),
        );
        self.queue.submit(job)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// The device, if it exists in one of `allowed`. Devices of other
    /// organizations are reported as missing.
    fn visible_device(&self, id: &EntityId, allowed: &[EntityId]) -> Result<Arc<Device>, CoreError> {
        self.store
            .device(id)
            .filter(|d| allowed.contains(&d.org))
            .ok_or_else(|| CoreError::not_found("device", id))
    }

    /// Live versions if the agent is connected, else the stored ones.
    fn versions_of(&self, device: &Device) -> AgentVersions {
        self.transport
            .agent_versions(&device.machine_id)
            .unwrap_or_else(|| device.versions.clone())
    }

    fn desired_for(&self, device: &Device) -> serde_json::Value {
        desired_config(device, &self.store.active_tunnels_for_device(&device.id))
    }

    fn new_job(
        &self,
        device: &Device,
        tasks: Vec<edgeplane_api::DeviceRequest>,
        response: JobResponse,
        priority: Priority,
        actor: &Actor,
    ) -> NewJob {
        NewJob {
            machine_id: device.machine_id.clone(),
            org: device.org.clone(),
            priority,
            attempts: self.config.default_attempts,
            tasks,
            response,
            actor: actor.user.clone(),
        }
    }

    fn submit_all(&self, jobs: impl IntoIterator<Item = NewJob>) -> DispatchOutcome {
        let mut offline: Vec<MachineId> = Vec::new();
        let mut ids = Vec::new();
        for job in jobs {
            if !self.transport.is_connected(&job.machine_id) && !offline.contains(&job.machine_id) {
                offline.push(job.machine_id.clone());
            }
            ids.push(self.queue.submit(job));
        }
        DispatchOutcome::from_jobs(ids, offline.len())
    }
}

fn intent_name(intent: &Intent) -> &'static str {
    match intent {
        Intent::AddDhcp(_) => "add-dhcp",
        Intent::ModifyDhcp { .. } => "modify-dhcp",
        Intent::RemoveDhcp { .. } => "remove-dhcp",
        Intent::AddStaticRoute(_) => "add-route",
        Intent::RemoveStaticRoute { .. } => "remove-route",
        Intent::ModifyDevice(_) => "modify-device",
        Intent::StartRouter => "start-router",
        Intent::StopRouter => "stop-router",
        Intent::Sync => "sync",
    }
}
