// ── Central document store ──
//
// In-process store for devices, tunnels and organizations. Reads are
// lock-free; every write (single-document or transactional) runs under
// one write lock, so read-modify-write of a sub-document never races
// another writer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use edgeplane_api::MachineId;
use tokio::sync::watch;

use super::collection::EntityCollection;
use super::inventory::Inventory;
use super::transaction::Transaction;
use crate::model::{
    DhcpServer, Device, EntityId, Interface, Organization, StaticRoute, SyncState, Tunnel,
};

/// Shared document store. Wrap in `Arc` and hand out clones.
pub struct DataStore {
    pub(super) devices: EntityCollection<Device>,
    machine_index: DashMap<MachineId, EntityId>,
    pub(super) tunnels: EntityCollection<Tunnel>,
    pub(super) organizations: EntityCollection<Organization>,
    write_lock: Mutex<()>,
    /// Bumped once per committed write.
    revision: watch::Sender<u64>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            devices: EntityCollection::new(),
            machine_index: DashMap::new(),
            tunnels: EntityCollection::new(),
            organizations: EntityCollection::new(),
            write_lock: Mutex::new(()),
            revision,
        }
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        let store = Self::new();
        store.load(inventory);
        store
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn device(&self, id: &EntityId) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn device_by_machine(&self, machine_id: &MachineId) -> Option<Arc<Device>> {
        let id = self.machine_index.get(machine_id)?.value().clone();
        self.devices.get(&id)
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Devices of one organization, excluding `except`.
    pub fn org_devices_except(&self, org: &EntityId, except: &EntityId) -> Vec<Arc<Device>> {
        self.devices
            .snapshot()
            .iter()
            .filter(|d| d.org == *org && d.id != *except)
            .cloned()
            .collect()
    }

    pub fn tunnel(&self, id: &EntityId) -> Option<Arc<Tunnel>> {
        self.tunnels.get(id)
    }

    pub fn tunnels_snapshot(&self) -> Arc<Vec<Arc<Tunnel>>> {
        self.tunnels.snapshot()
    }

    /// Reverse lookup: active tunnels with an end on `device`.
    pub fn active_tunnels_for_device(&self, device: &EntityId) -> Vec<Arc<Tunnel>> {
        self.tunnels
            .snapshot()
            .iter()
            .filter(|t| t.is_active && t.references_device(device))
            .cloned()
            .collect()
    }

    pub fn organization(&self, id: &EntityId) -> Option<Arc<Organization>> {
        self.organizations.get(id)
    }

    /// Watch the store revision; changes once per committed write.
    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // ── Whole-document writes ────────────────────────────────────────

    pub fn insert_device(&self, device: Device) {
        let _guard = self.write();
        self.put_device_locked(device);
        self.bump();
    }

    pub fn insert_tunnel(&self, tunnel: Tunnel) {
        let _guard = self.write();
        self.tunnels.upsert(tunnel.id.clone(), tunnel);
        self.bump();
    }

    pub fn insert_organization(&self, org: Organization) {
        let _guard = self.write();
        self.organizations.upsert(org.id.clone(), org);
        self.bump();
    }

    /// Upsert every document in the inventory.
    pub fn load(&self, inventory: Inventory) {
        let _guard = self.write();
        for org in inventory.organizations {
            self.organizations.upsert(org.id.clone(), org);
        }
        for device in inventory.devices {
            self.put_device_locked(device);
        }
        for tunnel in inventory.tunnels {
            self.tunnels.upsert(tunnel.id.clone(), tunnel);
        }
        self.bump();
    }

    /// Consistent copy of every document, sorted by id.
    pub fn to_inventory(&self) -> Inventory {
        let _guard = self.write();
        let mut inventory = Inventory {
            organizations: unwrap_all(&self.organizations.snapshot()),
            devices: unwrap_all(&self.devices.snapshot()),
            tunnels: unwrap_all(&self.tunnels.snapshot()),
        };
        inventory.organizations.sort_by(|a, b| a.id.cmp(&b.id));
        inventory.devices.sort_by(|a, b| a.id.cmp(&b.id));
        inventory.tunnels.sort_by(|a, b| a.id.cmp(&b.id));
        inventory
    }

    // ── Targeted updates ─────────────────────────────────────────────
    //
    // Each returns `false` (or `None`) when the device or the matching
    // array element no longer exists, and writes nothing in that case.

    /// Apply `f` to the device. `None` if the device is gone.
    pub fn update_device<R>(&self, id: &EntityId, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        let _guard = self.write();
        let mut device = (*self.devices.get(id)?).clone();
        let result = f(&mut device);
        self.put_device_locked(device);
        self.bump();
        Some(result)
    }

    pub fn update_sync(&self, device: &EntityId, f: impl FnOnce(&mut SyncState)) -> bool {
        self.update_device(device, |d| f(&mut d.sync)).is_some()
    }

    /// Update the DHCP entry whose id equals `dhcp`.
    pub fn update_dhcp(
        &self,
        device: &EntityId,
        dhcp: &EntityId,
        f: impl FnOnce(&mut DhcpServer),
    ) -> bool {
        self.modify_device(device, |d| match d.dhcp.iter_mut().find(|e| e.id == *dhcp) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        })
    }

    pub fn remove_dhcp(&self, device: &EntityId, dhcp: &EntityId) -> bool {
        self.modify_device(device, |d| {
            let before = d.dhcp.len();
            d.dhcp.retain(|e| e.id != *dhcp);
            d.dhcp.len() != before
        })
    }

    /// Update the static route whose id equals `route`.
    pub fn update_route(
        &self,
        device: &EntityId,
        route: &EntityId,
        f: impl FnOnce(&mut StaticRoute),
    ) -> bool {
        self.modify_device(device, |d| {
            match d.static_routes.iter_mut().find(|r| r.id == *route) {
                Some(entry) => {
                    f(entry);
                    true
                }
                None => false,
            }
        })
    }

    pub fn remove_route(&self, device: &EntityId, route: &EntityId) -> bool {
        self.modify_device(device, |d| {
            let before = d.static_routes.len();
            d.static_routes.retain(|r| r.id != *route);
            d.static_routes.len() != before
        })
    }

    /// Apply `f` to each listed interface that still exists. Returns the
    /// number of interfaces touched.
    pub fn update_interfaces(
        &self,
        device: &EntityId,
        ids: &[EntityId],
        f: impl Fn(&mut Interface),
    ) -> usize {
        let mut touched = 0;
        self.modify_device(device, |d| {
            for iface in d.interfaces.iter_mut().filter(|i| ids.contains(&i.id)) {
                f(iface);
                touched += 1;
            }
            touched > 0
        });
        touched
    }

    /// Apply `f` to the tunnel. `None` if the tunnel is gone.
    pub fn update_tunnel<R>(&self, id: &EntityId, f: impl FnOnce(&mut Tunnel) -> R) -> Option<R> {
        let _guard = self.write();
        let mut tunnel = (*self.tunnels.get(id)?).clone();
        let result = f(&mut tunnel);
        self.tunnels.upsert(tunnel.id.clone(), tunnel);
        self.bump();
        Some(result)
    }

    // ── Transactions ─────────────────────────────────────────────────

    /// Run `f` against a staged view of the store and commit its writes
    /// only if it returns `Ok`. No other writer runs in between.
    pub fn transaction<T, E>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let _guard = self.write();
        let mut tx = Transaction::new(self);
        let value = f(&mut tx)?;
        tx.commit_locked();
        self.bump();
        Ok(value)
    }

    // ── Internals (write lock held) ──────────────────────────────────

    fn write(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`; a poisoned lock carries no broken state.
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Clone, mutate, and store back only if `f` reports a change.
    fn modify_device(&self, id: &EntityId, f: impl FnOnce(&mut Device) -> bool) -> bool {
        let _guard = self.write();
        let Some(current) = self.devices.get(id) else {
            return false;
        };
        let mut device = (*current).clone();
        if !f(&mut device) {
            return false;
        }
        self.put_device_locked(device);
        self.bump();
        true
    }

    pub(super) fn put_device_locked(&self, device: Device) {
        if let Some(previous) = self.devices.get(&device.id) {
            if previous.machine_id != device.machine_id {
                self.machine_index.remove(&previous.machine_id);
            }
        }
        self.machine_index
            .insert(device.machine_id.clone(), device.id.clone());
        self.devices.upsert(device.id.clone(), device);
    }

    pub(super) fn remove_device_locked(&self, id: &EntityId) {
        if let Some(removed) = self.devices.remove(id) {
            self.machine_index
                .remove_if(&removed.machine_id, |_, owner| owner == id);
        }
    }
}

fn unwrap_all<T: Clone>(items: &[Arc<T>]) -> Vec<T> {
    items.iter().map(|item| (**item).clone()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ItemStatus;
    use crate::test_support::{dhcp_server, lan_wan_device};

    #[test]
    fn machine_index_follows_device() {
        let store = DataStore::new();
        store.insert_device(lan_wan_device("dev-1", "m-1"));
        assert_eq!(
            store.device_by_machine(&"M-1".into()).unwrap().id,
            EntityId::from("dev-1")
        );

        store.update_device(&"dev-1".into(), |d| d.machine_id = "m-2".into());
        assert!(store.device_by_machine(&"m-1".into()).is_none());
        assert!(store.device_by_machine(&"m-2".into()).is_some());
    }

    #[test]
    fn dhcp_update_targets_one_entry() {
        let store = DataStore::new();
        let mut device = lan_wan_device("dev-1", "m-1");
        device.dhcp.push(dhcp_server("d1", ItemStatus::AddWait));
        device.dhcp.push(dhcp_server("d2", ItemStatus::AddWait));
        store.insert_device(device);

        assert!(store.update_dhcp(&"dev-1".into(), &"d2".into(), |e| e.status = ItemStatus::Complete));
        let device = store.device(&"dev-1".into()).unwrap();
        assert_eq!(device.dhcp[0].status, ItemStatus::AddWait);
        assert_eq!(device.dhcp[1].status, ItemStatus::Complete);

        assert!(!store.update_dhcp(&"dev-1".into(), &"missing".into(), |_| {}));
        assert!(!store.update_dhcp(&"no-such-device".into(), &"d1".into(), |_| {}));
    }

    #[test]
    fn noop_update_does_not_bump_revision() {
        let store = DataStore::new();
        store.insert_device(lan_wan_device("dev-1", "m-1"));
        let rx = store.subscribe_revision();
        let before = *rx.borrow();
        assert!(!store.remove_route(&"dev-1".into(), &"nope".into()));
        assert_eq!(*rx.borrow(), before);
        assert!(!store.remove_dhcp(&"dev-1".into(), &"nope".into()));
    }

    #[test]
    fn inventory_round_trip_is_sorted() {
        let store = DataStore::new();
        store.insert_device(lan_wan_device("b", "m-b"));
        store.insert_device(lan_wan_device("a", "m-a"));
        let inventory = store.to_inventory();
        let ids: Vec<String> = inventory.devices.iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let copy = DataStore::from_inventory(inventory);
        assert_eq!(copy.device_count(), 2);
        assert!(copy.device_by_machine(&"m-a".into()).is_some());
    }
}
