// DHCP servers and static routes share one status lifecycle.

use tracing::debug;

use super::item_transition;
use crate::error::CoreError;
use crate::model::{ChangeAction, EntityId};
use crate::queue::JobOutcome;
use crate::store::DataStore;

pub(super) fn reconcile_dhcp(
    store: &DataStore,
    device_id: &EntityId,
    dhcp_id: &EntityId,
    action: ChangeAction,
    outcome: &JobOutcome,
) -> Result<(), CoreError> {
    if store.device(device_id).is_none() {
        return Err(CoreError::not_found("device", device_id));
    }
    let applied = match item_transition(action, outcome) {
        None => store.remove_dhcp(device_id, dhcp_id),
        Some(status) => store.update_dhcp(device_id, dhcp_id, |entry| entry.status = status),
    };
    if !applied {
        debug!(device_id = %device_id, dhcp_id = %dhcp_id, "dhcp entry already gone");
    }
    Ok(())
}

pub(super) fn reconcile_route(
    store: &DataStore,
    device_id: &EntityId,
    route_id: &EntityId,
    action: ChangeAction,
    outcome: &JobOutcome,
) -> Result<(), CoreError> {
    if store.device(device_id).is_none() {
        return Err(CoreError::not_found("device", device_id));
    }
    let applied = match item_transition(action, outcome) {
        None => store.remove_route(device_id, route_id),
        Some(status) => store.update_route(device_id, route_id, |route| route.status = status),
    };
    if !applied {
        debug!(device_id = %device_id, route_id = %route_id, "static route already gone");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use edgeplane_api::AgentReply;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::ItemStatus;
    use crate::queue::JobFailure;
    use crate::test_support::{dhcp_server, lan_wan_device, static_route};

    fn store_with(dhcp: ItemStatus, route: ItemStatus) -> DataStore {
        let store = DataStore::new();
        let mut device = lan_wan_device("dev-1", "m1");
        device.dhcp.push(dhcp_server("dhcp-1", dhcp));
        device.static_routes.push(static_route("route-1", route));
        store.insert_device(device);
        store
    }

    fn dhcp_status(store: &DataStore) -> Option<ItemStatus> {
        store
            .device(&"dev-1".into())
            .unwrap()
            .dhcp_server(&"dhcp-1".into())
            .map(|d| d.status)
    }

    fn route_status(store: &DataStore) -> Option<ItemStatus> {
        store
            .device(&"dev-1".into())
            .unwrap()
            .static_route(&"route-1".into())
            .map(|r| r.status)
    }

    #[test]
    fn dhcp_add_completes_and_repeat_is_harmless() {
        let store = store_with(ItemStatus::AddWait, ItemStatus::Complete);
        let done = JobOutcome::Complete(AgentReply::ok("ok"));

        for _ in 0..2 {
            reconcile_dhcp(&store, &"dev-1".into(), &"dhcp-1".into(), ChangeAction::Add, &done)
                .unwrap();
            assert_eq!(dhcp_status(&store), Some(ItemStatus::Complete));
        }
        assert_eq!(store.device(&"dev-1".into()).unwrap().dhcp.len(), 1);
    }

    #[test]
    fn dhcp_add_failure_marks_add_failed() {
        let store = store_with(ItemStatus::AddWait, ItemStatus::Complete);
        let failed = JobOutcome::Failed(JobFailure::Agent("range busy".into()));
        reconcile_dhcp(&store, &"dev-1".into(), &"dhcp-1".into(), ChangeAction::Add, &failed)
            .unwrap();
        assert_eq!(dhcp_status(&store), Some(ItemStatus::AddFailed));
    }

    #[test]
    fn dhcp_removal_deletes_entry_once() {
        let store = store_with(ItemStatus::DelWait, ItemStatus::Complete);
        let done = JobOutcome::Complete(AgentReply::ok("ok"));
        for _ in 0..2 {
            reconcile_dhcp(&store, &"dev-1".into(), &"dhcp-1".into(), ChangeAction::Remove, &done)
                .unwrap();
        }
        assert_eq!(dhcp_status(&store), None);
        assert_eq!(route_status(&store), Some(ItemStatus::Complete));
    }

    #[test]
    fn removed_job_marks_job_deleted() {
        let store = store_with(ItemStatus::Complete, ItemStatus::AddWait);
        reconcile_route(
            &store,
            &"dev-1".into(),
            &"route-1".into(),
            ChangeAction::Add,
            &JobOutcome::Removed,
        )
        .unwrap();
        assert_eq!(route_status(&store), Some(ItemStatus::JobDeleted));
        assert_eq!(dhcp_status(&store), Some(ItemStatus::Complete));
    }

    #[test]
    fn route_removal_failure_keeps_entry() {
        let store = store_with(ItemStatus::Complete, ItemStatus::DelWait);
        let failed = JobOutcome::Failed(JobFailure::Timeout { timeout_ms: 1000 });
        reconcile_route(&store, &"dev-1".into(), &"route-1".into(), ChangeAction::Remove, &failed)
            .unwrap();
        assert_eq!(route_status(&store), Some(ItemStatus::RemoveFailed));
    }
}
