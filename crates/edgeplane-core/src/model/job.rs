// ── Job domain types ──
//
// A job is one unit of work for one device: an ordered task list plus a
// response descriptor naming the operation and the ids its outcome must
// be reconciled against.

use std::fmt;

use chrono::{DateTime, Utc};
use edgeplane_api::{DeviceRequest, MachineId};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::ids::EntityId;
use super::tunnel::TunnelSide;

// ── JobId ───────────────────────────────────────────────────────────

/// Monotonic job number, unique within one control-plane process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Complete,
    Failed,
    Removed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Removed)
    }
}

/// Higher priority jumps ahead of lower in a device's lane.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Modify,
    Remove,
}

/// Closed set of job operation types. Each has exactly one reconciliation
/// transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    Dhcp,
    StaticRoutes,
    Tunnels,
    Modify,
    Sync,
    Router,
}

// ── JobResponse ─────────────────────────────────────────────────────

/// What the outcome handler needs to find the affected sub-document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "kebab-case")]
pub enum JobResponse {
    #[serde(rename_all = "camelCase")]
    Dhcp {
        device_id: EntityId,
        dhcp_id: EntityId,
        action: ChangeAction,
    },
    #[serde(rename_all = "camelCase")]
    StaticRoutes {
        device_id: EntityId,
        route_id: EntityId,
        action: ChangeAction,
    },
    #[serde(rename_all = "camelCase")]
    Tunnels {
        device_id: EntityId,
        tunnel_id: EntityId,
        side: TunnelSide,
        action: ChangeAction,
    },
    #[serde(rename_all = "camelCase")]
    Modify {
        device_id: EntityId,
        /// Interfaces whose `modified` flag this job clears.
        interfaces: Vec<EntityId>,
    },
    #[serde(rename_all = "camelCase")]
    Sync { device_id: EntityId },
    #[serde(rename_all = "camelCase")]
    Router { device_id: EntityId, start: bool },
}

impl JobResponse {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Dhcp { .. } => Operation::Dhcp,
            Self::StaticRoutes { .. } => Operation::StaticRoutes,
            Self::Tunnels { .. } => Operation::Tunnels,
            Self::Modify { .. } => Operation::Modify,
            Self::Sync { .. } => Operation::Sync,
            Self::Router { .. } => Operation::Router,
        }
    }

    pub fn device_id(&self) -> &EntityId {
        match self {
            Self::Dhcp { device_id, .. }
            | Self::StaticRoutes { device_id, .. }
            | Self::Tunnels { device_id, .. }
            | Self::Modify { device_id, .. }
            | Self::Sync { device_id }
            | Self::Router { device_id, .. } => device_id,
        }
    }
}

// ── Job ─────────────────────────────────────────────────────────────

/// Everything needed to create a job. The queue assigns id, state and
/// timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub machine_id: MachineId,
    pub org: EntityId,
    pub priority: Priority,
    pub attempts: u32,
    pub tasks: Vec<DeviceRequest>,
    pub response: JobResponse,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub machine_id: MachineId,
    pub device_id: EntityId,
    pub org: EntityId,
    pub priority: Priority,
    pub attempts: u32,
    pub attempts_made: u32,
    pub tasks: Vec<DeviceRequest>,
    pub response: JobResponse,
    pub state: JobState,
    /// Last failure reason; set on `failed`.
    pub error: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn from_new(id: JobId, new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            device_id: new.response.device_id().clone(),
            machine_id: new.machine_id,
            org: new.org,
            priority: new.priority,
            attempts: new.attempts.max(1),
            attempts_made: 0,
            tasks: new.tasks,
            response: new.response,
            state: JobState::Queued,
            error: None,
            actor: new.actor,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn operation(&self) -> Operation {
        self.response.operation()
    }
}
