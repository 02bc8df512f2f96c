// ── Command API ──
//
// Every write an operator can make flows through one `Command` enum and
// one channel, so validate-then-insert runs for one command at a time.

use crate::dispatch::{Actor, DispatchOutcome, Intent, TunnelRequest};
use crate::error::CoreError;
use crate::model::{EntityId, JobId};

/// A command plus the channel its result goes back on.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All operator writes against the control plane.
#[derive(Debug, Clone)]
pub enum Command {
    // ── Intents ──────────────────────────────────────────────────────
    Apply {
        devices: Vec<EntityId>,
        intent: Intent,
        actor: Actor,
    },
    AddTunnels {
        requests: Vec<TunnelRequest>,
        actor: Actor,
    },
    RemoveTunnels {
        ids: Vec<EntityId>,
        actor: Actor,
    },

    // ── Device lifecycle ─────────────────────────────────────────────
    Approve {
        device_id: EntityId,
        approved: bool,
        actor: Actor,
    },
    DeleteDevice {
        device_id: EntityId,
        actor: Actor,
    },

    // ── Jobs ─────────────────────────────────────────────────────────
    CancelJob {
        job_id: JobId,
        actor: Actor,
    },
}

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Jobs were (or did not need to be) queued.
    Dispatched(DispatchOutcome),
    /// Completed with no jobs involved.
    Ok,
}

impl CommandResult {
    /// The dispatch outcome, if this command produced one.
    pub fn outcome(&self) -> Option<&DispatchOutcome> {
        match self {
            Self::Dispatched(outcome) => Some(outcome),
            Self::Ok => None,
        }
    }
}
