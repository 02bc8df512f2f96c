// ── Intent validation ──
//
// Pure checks run before any job exists. Nothing here touches the
// store or the transport; callers pass in the documents to check.

mod device;
mod dhcp;
mod network;
mod route;
mod structure;

pub use device::{validate_device, validate_org_lan_overlap};
pub use dhcp::validate_dhcp;
pub use network::subnets_overlap;
pub use route::validate_static_route;
pub use structure::{validate_interface_changes, validate_tunnel_endpoint};

use thiserror::Error;

/// Why an intent was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The proposed configuration breaks an invariant.
    #[error("{reason}")]
    Invalid { reason: String },
    /// The change is blocked by dependent state (e.g. an active tunnel).
    #[error("{reason}")]
    Conflict { reason: String },
}

impl Rejection {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Invalid { reason } | Self::Conflict { reason } => reason,
        }
    }
}
