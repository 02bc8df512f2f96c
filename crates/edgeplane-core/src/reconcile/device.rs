// Whole-device jobs: interface changes, full sync, router start/stop.

use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{EntityId, SyncStatus};
use crate::queue::JobOutcome;
use crate::store::DataStore;

pub(super) fn reconcile_modify(
    store: &DataStore,
    device_id: &EntityId,
    interfaces: &[EntityId],
    outcome: &JobOutcome,
) -> Result<(), CoreError> {
    if store.device(device_id).is_none() {
        return Err(CoreError::not_found("device", device_id));
    }
    match outcome {
        JobOutcome::Complete(_) => {
            store.update_interfaces(device_id, interfaces, |iface| iface.modified = false);
        }
        JobOutcome::Failed(_) | JobOutcome::Removed => mark_unknown(store, device_id),
    }
    Ok(())
}

pub(super) fn reconcile_sync(
    store: &DataStore,
    device_id: &EntityId,
    outcome: &JobOutcome,
) -> Result<(), CoreError> {
    let device = store
        .device(device_id)
        .ok_or_else(|| CoreError::not_found("device", device_id))?;
    match outcome {
        JobOutcome::Complete(_) => {
            let modified: Vec<EntityId> = device
                .interfaces
                .iter()
                .filter(|i| i.modified)
                .map(|i| i.id.clone())
                .collect();
            store.update_interfaces(device_id, &modified, |iface| iface.modified = false);
            debug!(device_id = %device_id, "full sync applied, awaiting fingerprint check");
        }
        JobOutcome::Failed(_) | JobOutcome::Removed => mark_unknown(store, device_id),
    }
    Ok(())
}

pub(super) fn reconcile_router(
    store: &DataStore,
    device_id: &EntityId,
    start: bool,
    outcome: &JobOutcome,
) -> Result<(), CoreError> {
    if !matches!(outcome, JobOutcome::Complete(_)) {
        return Ok(());
    }
    store
        .update_device(device_id, |d| d.is_running = start)
        .ok_or_else(|| CoreError::not_found("device", device_id))?;
    info!(device_id = %device_id, running = start, "router state updated");
    Ok(())
}

/// Leave the device for the sync engine to re-check.
fn mark_unknown(store: &DataStore, device_id: &EntityId) {
    store.update_sync(device_id, |sync| sync.state = SyncStatus::Unknown);
}
