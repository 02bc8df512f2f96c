// ── Domain model ──
//
// Persisted documents (devices, tunnels, organizations) and the job
// records the queue tracks.

mod device;
mod ids;
mod job;
mod tunnel;

pub use device::{
    Device, DhcpServer, Interface, InterfaceType, ItemStatus, MacAssignment, Organization,
    RoutingProtocol, StaticRoute, SyncState, SyncStatus,
};
pub use ids::{EntityId, MacAddress};
pub use job::{ChangeAction, Job, JobId, JobResponse, JobState, NewJob, Operation, Priority};
pub use tunnel::{EncryptionMethod, Tunnel, TunnelEnd, TunnelSide};
