// ── Core error types ──
//
// Errors surfaced to callers of the control plane. Transport failures
// from edgeplane-api are folded into domain variants by the `From` impl;
// validator rejections map onto `Validation` or `Conflict`.

use thiserror::Error;

use crate::validate::Rejection;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Intent errors ────────────────────────────────────────────────
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device {machine_id} is not connected")]
    DeviceUnreachable { machine_id: String },

    #[error("Agent reported failure: {message}")]
    AgentError { message: String },

    #[error("Device {machine_id} did not answer within {timeout_ms}ms")]
    TransportTimeout { machine_id: String, timeout_ms: u64 },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Control plane is not running")]
    ControlPlaneStopped,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn not_found(entity_type: &str, identifier: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_owned(),
            identifier: identifier.to_string(),
        }
    }

    pub(crate) fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<edgeplane_api::Error> for CoreError {
    fn from(err: edgeplane_api::Error) -> Self {
        match err {
            edgeplane_api::Error::NotConnected { machine_id }
            | edgeplane_api::Error::ChannelClosed { machine_id } => {
                CoreError::DeviceUnreachable { machine_id }
            }
            edgeplane_api::Error::Timeout {
                machine_id,
                timeout_ms,
            } => CoreError::TransportTimeout {
                machine_id,
                timeout_ms,
            },
            edgeplane_api::Error::Refused { machine_id, reason } => CoreError::Conflict {
                reason: format!("agent {machine_id} refused: {reason}"),
            },
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<Rejection> for CoreError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Invalid { reason } => CoreError::Validation { reason },
            Rejection::Conflict { reason } => CoreError::Conflict { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_domain_variants() {
        let err: CoreError = edgeplane_api::Error::NotConnected {
            machine_id: "M1".into(),
        }
        .into();
        assert!(matches!(err, CoreError::DeviceUnreachable { machine_id } if machine_id == "M1"));

        let err: CoreError = edgeplane_api::Error::Timeout {
            machine_id: "M1".into(),
            timeout_ms: 500,
        }
        .into();
        assert!(matches!(err, CoreError::TransportTimeout { timeout_ms: 500, .. }));
    }

    #[test]
    fn rejections_keep_their_kind() {
        let err: CoreError = Rejection::conflict("tunnel uses interface").into();
        assert!(matches!(err, CoreError::Conflict { .. }));
        let err: CoreError = Rejection::invalid("bad range").into();
        assert_eq!(err.to_string(), "Validation failed: bad range");
    }
}
