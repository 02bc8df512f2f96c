// ── State reconciliation ──
//
// Folds terminal job outcomes back into the stored documents. Each
// operation type has one `reconcile` transition function that touches
// only the sub-document the job was about, so it can be tested against
// a bare `DataStore`. Every transition is idempotent: replaying the same
// outcome leaves the store unchanged.

mod device;
mod items;
mod tunnels;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{ChangeAction, ItemStatus, Job, JobResponse};
use crate::queue::{JobOutcome, OutcomeHandler};
use crate::store::DataStore;

/// Outcome handler that writes job results into the store.
pub struct Reconciler {
    store: Arc<DataStore>,
}

impl Reconciler {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    /// Apply one outcome. `NotFound` when the device or tunnel the job
    /// was about has since been deleted.
    pub fn apply(&self, response: &JobResponse, outcome: &JobOutcome) -> Result<(), CoreError> {
        let store = &*self.store;
        match response {
            JobResponse::Dhcp {
                device_id,
                dhcp_id,
                action,
            } => items::reconcile_dhcp(store, device_id, dhcp_id, *action, outcome),
            JobResponse::StaticRoutes {
                device_id,
                route_id,
                action,
            } => items::reconcile_route(store, device_id, route_id, *action, outcome),
            JobResponse::Tunnels {
                tunnel_id,
                side,
                action,
                ..
            } => tunnels::reconcile(store, tunnel_id, *side, *action, outcome),
            JobResponse::Modify {
                device_id,
                interfaces,
            } => device::reconcile_modify(store, device_id, interfaces, outcome),
            JobResponse::Sync { device_id } => device::reconcile_sync(store, device_id, outcome),
            JobResponse::Router { device_id, start } => {
                device::reconcile_router(store, device_id, *start, outcome)
            }
        }
    }
}

impl OutcomeHandler for Reconciler {
    fn on_outcome(&self, job: &Job, outcome: &JobOutcome) {
        match self.apply(&job.response, outcome) {
            Ok(()) => debug!(
                job_id = %job.id,
                operation = %job.operation(),
                state = %outcome.state(),
                "outcome reconciled"
            ),
            Err(CoreError::NotFound {
                entity_type,
                identifier,
            }) => debug!(
                job_id = %job.id,
                entity_type,
                identifier,
                "outcome for deleted document ignored"
            ),
            Err(e) => warn!(job_id = %job.id, error = %e, "failed to reconcile job outcome"),
        }
    }
}

/// Status an item moves to after its job ends. `None` means the entry
/// is deleted.
pub(crate) fn item_transition(action: ChangeAction, outcome: &JobOutcome) -> Option<ItemStatus> {
    match (outcome, action) {
        (JobOutcome::Complete(_), ChangeAction::Remove) => None,
        (JobOutcome::Complete(_), _) => Some(ItemStatus::Complete),
        (JobOutcome::Failed(_), ChangeAction::Remove) => Some(ItemStatus::RemoveFailed),
        (JobOutcome::Failed(_), _) => Some(ItemStatus::AddFailed),
        (JobOutcome::Removed, _) => Some(ItemStatus::JobDeleted),
    }
}
