// Tunnel jobs run once per side; each side's status moves on its own.
// A confirmed removal marks the side removed, and the tunnel stays
// active until both sides are.

use tracing::info;

use super::item_transition;
use crate::error::CoreError;
use crate::model::{ChangeAction, EntityId, ItemStatus, TunnelSide};
use crate::queue::JobOutcome;
use crate::store::DataStore;

pub(super) fn reconcile(
    store: &DataStore,
    tunnel_id: &EntityId,
    side: TunnelSide,
    action: ChangeAction,
    outcome: &JobOutcome,
) -> Result<(), CoreError> {
    let status = item_transition(action, outcome).unwrap_or(ItemStatus::Complete);
    let removal_done = action == ChangeAction::Remove && matches!(outcome, JobOutcome::Complete(_));

    let deactivated = store
        .update_tunnel(tunnel_id, |tunnel| {
            let end = tunnel.end_mut(side);
            if end.removed {
                return false;
            }
            end.status = status;
            end.removed = removal_done;
            if tunnel.both_removed() && tunnel.is_active {
                tunnel.is_active = false;
                return true;
            }
            false
        })
        .ok_or_else(|| CoreError::not_found("tunnel", tunnel_id))?;

    if deactivated {
        info!(tunnel_id = %tunnel_id, "tunnel removed from both devices");
    }
    Ok(())
}
