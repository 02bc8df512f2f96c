// Tunnel intents span two devices, so they bypass per-device planning:
// one tunnel document and one job per side.

use std::sync::Arc;

use tracing::info;

use super::{Actor, DispatchOutcome, Dispatcher, TunnelRequest, tasks};
use crate::error::CoreError;
use crate::model::{
    ChangeAction, Device, EntityId, Interface, ItemStatus, JobResponse, NewJob, Priority, Tunnel,
    TunnelEnd, TunnelSide,
};
use crate::validate::validate_tunnel_endpoint;

impl Dispatcher {
    /// Create tunnels and queue an `add-tunnel` job for each side.
    pub fn add_tunnels(
        &self,
        requests: &[TunnelRequest],
        actor: &Actor,
    ) -> Result<DispatchOutcome, CoreError> {
        if requests.is_empty() {
            return Err(CoreError::validation("no tunnels requested"));
        }
        let allowed = self.orgs.allowed_orgs(actor)?;
        let existing = self.store.tunnels_snapshot();

        let mut staged: Vec<Tunnel> = Vec::with_capacity(requests.len());
        let mut jobs: Vec<NewJob> = Vec::with_capacity(requests.len() * 2);
        for request in requests {
            if request.device_a == request.device_b {
                return Err(CoreError::validation("a tunnel needs two different devices"));
            }
            let a = self.tunnel_device(&request.device_a, &allowed)?;
            let b = self.tunnel_device(&request.device_b, &allowed)?;
            if a.org != b.org {
                return Err(CoreError::validation(format!(
                    "{} and {} belong to different organizations",
                    a.label(),
                    b.label()
                )));
            }
            validate_tunnel_endpoint(&a, &request.interface_a, request.path_label.as_ref())?;
            validate_tunnel_endpoint(&b, &request.interface_b, request.path_label.as_ref())?;

            let duplicate = existing
                .iter()
                .map(|t| &**t)
                .chain(staged.iter())
                .any(|t| t.is_active && joins(t, request));
            if duplicate {
                return Err(CoreError::conflict(format!(
                    "a tunnel between {} and {} on these interfaces already exists",
                    a.label(),
                    b.label()
                )));
            }

            let num = existing
                .iter()
                .map(|t| &**t)
                .chain(staged.iter())
                .filter(|t| t.org == a.org)
                .map(|t| t.num)
                .max()
                .unwrap_or(0)
                + 1;
            let tunnel = Tunnel {
                id: EntityId::generate(),
                org: a.org.clone(),
                num,
                a: TunnelEnd::new(a.id.clone(), request.interface_a.clone()),
                b: TunnelEnd::new(b.id.clone(), request.interface_b.clone()),
                is_active: true,
                encryption: request.encryption,
                path_label: request.path_label.clone(),
            };

            let iface_a = endpoint(&a, &request.interface_a)?;
            let iface_b = endpoint(&b, &request.interface_b)?;
            for (side, device, local, remote) in [
                (TunnelSide::A, &a, iface_a, iface_b),
                (TunnelSide::B, &b, iface_b, iface_a),
            ] {
                jobs.push(self.tunnel_job(
                    device,
                    &tunnel,
                    side,
                    ChangeAction::Add,
                    tasks::add_tunnel(&tunnel, side, local, remote),
                    actor,
                ));
            }
            staged.push(tunnel);
        }

        let created: Vec<u32> = staged.iter().map(|t| t.num).collect();
        self.store.transaction(|tx| {
            for tunnel in staged {
                tx.put_tunnel(tunnel);
            }
            Ok::<_, CoreError>(())
        })?;

        let outcome = self.submit_all(jobs);
        info!(user = %actor.user, tunnels = ?created, status = %outcome.status, "tunnels added");
        Ok(outcome)
    }

    /// Queue `remove-tunnel` jobs for active tunnels. Sides already
    /// removed get nothing. A side the device never acknowledged needs
    /// no job and counts as removed at once.
    pub fn remove_tunnels(
        &self,
        ids: &[EntityId],
        actor: &Actor,
    ) -> Result<DispatchOutcome, CoreError> {
        if ids.is_empty() {
            return Err(CoreError::validation("no tunnels selected"));
        }
        let allowed = self.orgs.allowed_orgs(actor)?;

        let mut updated: Vec<Tunnel> = Vec::with_capacity(ids.len());
        let mut jobs: Vec<NewJob> = Vec::new();
        for id in ids {
            let mut tunnel = self
                .store
                .tunnel(id)
                .filter(|t| allowed.contains(&t.org))
                .map(|t| (*t).clone())
                .ok_or_else(|| CoreError::not_found("tunnel", id))?;
            if !tunnel.is_active {
                return Err(CoreError::conflict(format!("tunnel {} is not active", tunnel.num)));
            }
            if tunnel.a.status.is_pending() || tunnel.b.status.is_pending() {
                return Err(CoreError::conflict(format!(
                    "tunnel {} has a job pending",
                    tunnel.num
                )));
            }

            for side in [TunnelSide::A, TunnelSide::B] {
                let end = tunnel.end(side).clone();
                if end.removed {
                    continue;
                }
                if !end.status.is_desired() {
                    tunnel.end_mut(side).removed = true;
                    continue;
                }
                let device = self
                    .store
                    .device(&end.device)
                    .ok_or_else(|| CoreError::not_found("device", &end.device))?;
                tunnel.end_mut(side).status = ItemStatus::DelWait;
                jobs.push(self.tunnel_job(
                    &device,
                    &tunnel,
                    side,
                    ChangeAction::Remove,
                    tasks::remove_tunnel(&tunnel, side),
                    actor,
                ));
            }
            if tunnel.both_removed() {
                tunnel.is_active = false;
            }
            updated.push(tunnel);
        }

        self.store.transaction(|tx| {
            for tunnel in updated {
                tx.put_tunnel(tunnel);
            }
            Ok::<_, CoreError>(())
        })?;

        let outcome = self.submit_all(jobs);
        info!(user = %actor.user, tunnels = ids.len(), status = %outcome.status, "tunnel removal dispatched");
        Ok(outcome)
    }

    fn tunnel_device(&self, id: &EntityId, allowed: &[EntityId]) -> Result<Arc<Device>, CoreError> {
        let device = self.visible_device(id, allowed)?;
        if !device.is_approved {
            return Err(CoreError::validation(format!(
                "device {} is not approved",
                device.label()
            )));
        }
        Ok(device)
    }

    fn tunnel_job(
        &self,
        device: &Device,
        tunnel: &Tunnel,
        side: TunnelSide,
        action: ChangeAction,
        task: edgeplane_api::DeviceRequest,
        actor: &Actor,
    ) -> NewJob {
        self.new_job(
            device,
            vec![task],
            JobResponse::Tunnels {
                device_id: device.id.clone(),
                tunnel_id: tunnel.id.clone(),
                side,
                action,
            },
            Priority::Normal,
            actor,
        )
    }
}

fn endpoint<'a>(device: &'a Device, interface: &EntityId) -> Result<&'a Interface, CoreError> {
    device
        .interface_by_id(interface)
        .ok_or_else(|| CoreError::not_found("interface", interface))
}

/// Whether `tunnel` joins the same two endpoints as `request`, in
/// either direction.
fn joins(tunnel: &Tunnel, request: &TunnelRequest) -> bool {
    let a = (&request.device_a, &request.interface_a);
    let b = (&request.device_b, &request.interface_b);
    let ta = (&tunnel.a.device, &tunnel.a.interface);
    let tb = (&tunnel.b.device, &tunnel.b.interface);
    (ta == a && tb == b) || (ta == b && tb == a)
}
