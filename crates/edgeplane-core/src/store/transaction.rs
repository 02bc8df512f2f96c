// ── Multi-document transactions ──
//
// A `Transaction` stages writes on top of the committed store. Reads see
// staged writes first. Nothing reaches the collections until the closure
// passed to `DataStore::transaction` returns `Ok`.

use std::collections::HashMap;

use super::data_store::DataStore;
use crate::model::{Device, EntityId, Organization, Tunnel};

/// Staged view of the store. `None` marks a staged deletion.
pub struct Transaction<'a> {
    store: &'a DataStore,
    devices: HashMap<EntityId, Option<Device>>,
    tunnels: HashMap<EntityId, Option<Tunnel>>,
    organizations: HashMap<EntityId, Option<Organization>>,
}

impl<'a> Transaction<'a> {
    pub(super) fn new(store: &'a DataStore) -> Self {
        Self {
            store,
            devices: HashMap::new(),
            tunnels: HashMap::new(),
            organizations: HashMap::new(),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn device(&self, id: &EntityId) -> Option<Device> {
        match self.devices.get(id) {
            Some(staged) => staged.clone(),
            None => self.store.devices.get(id).map(|d| (*d).clone()),
        }
    }

    pub fn tunnel(&self, id: &EntityId) -> Option<Tunnel> {
        match self.tunnels.get(id) {
            Some(staged) => staged.clone(),
            None => self.store.tunnels.get(id).map(|t| (*t).clone()),
        }
    }

    pub fn organization(&self, id: &EntityId) -> Option<Organization> {
        match self.organizations.get(id) {
            Some(staged) => staged.clone(),
            None => self.store.organizations.get(id).map(|o| (*o).clone()),
        }
    }

    /// Active tunnels with an end on `device`, staged writes included.
    pub fn active_tunnels_for_device(&self, device: &EntityId) -> Vec<Tunnel> {
        let committed = self
            .store
            .tunnels
            .snapshot()
            .iter()
            .filter(|t| !self.tunnels.contains_key(&t.id))
            .map(|t| (**t).clone())
            .collect::<Vec<_>>();
        let staged = self.tunnels.values().flatten().cloned();

        committed
            .into_iter()
            .chain(staged)
            .filter(|t| t.is_active && t.references_device(device))
            .collect()
    }

    // ── Staged writes ────────────────────────────────────────────────

    pub fn put_device(&mut self, device: Device) {
        self.devices.insert(device.id.clone(), Some(device));
    }

    pub fn delete_device(&mut self, id: &EntityId) {
        self.devices.insert(id.clone(), None);
    }

    pub fn put_tunnel(&mut self, tunnel: Tunnel) {
        self.tunnels.insert(tunnel.id.clone(), Some(tunnel));
    }

    pub fn put_organization(&mut self, org: Organization) {
        self.organizations.insert(org.id.clone(), Some(org));
    }

    /// Apply every staged write. Caller holds the store write lock.
    pub(super) fn commit_locked(self) {
        for (id, staged) in self.organizations {
            match staged {
                Some(org) => {
                    self.store.organizations.upsert(id, org);
                }
                None => {
                    self.store.organizations.remove(&id);
                }
            }
        }
        for (id, staged) in self.devices {
            match staged {
                Some(device) => self.store.put_device_locked(device),
                None => self.store.remove_device_locked(&id),
            }
        }
        for (id, staged) in self.tunnels {
            match staged {
                Some(tunnel) => {
                    self.store.tunnels.upsert(id, tunnel);
                }
                None => {
                    self.store.tunnels.remove(&id);
                }
            }
        }
    }
}
