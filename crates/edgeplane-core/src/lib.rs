// edgeplane-core: intent dispatch, per-device job queue, reconciliation and sync.

pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod sync;
pub mod validate;

#[cfg(test)]
mod test_support;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::{ControlPlaneConfig, SyncConfig};
pub use controller::{Controller, StoreAdmission};
pub use dispatch::{
    Actor, DeviceUpdate, DhcpRequest, DispatchOutcome, DispatchStatus, Dispatcher, Intent,
    Memberships, OrgResolver, ReadOutcome, ReadRequest, StaticRouteRequest, TrustedOrg,
    TunnelRequest, desired_config,
};
pub use error::CoreError;
pub use queue::{JobEvent, JobQueue};
pub use store::{DataStore, Inventory};
pub use sync::{SyncEngine, SyncReport, fingerprint};

// Model types at the crate root for ergonomics.
pub use model::{
    // Documents
    Device, DhcpServer, Interface, Organization, StaticRoute, Tunnel, TunnelEnd,
    // Supporting types
    EncryptionMethod, EntityId, InterfaceType, ItemStatus, MacAddress, MacAssignment,
    RoutingProtocol, SyncState, SyncStatus, TunnelSide,
    // Jobs
    Job, JobId, JobState, Priority,
};
