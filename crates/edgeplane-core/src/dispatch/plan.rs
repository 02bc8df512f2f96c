// ── Per-device intent planning ──
//
// Planning reads the stored device and decides, without writing
// anything, what changes in the document and which tasks go to the
// agent. Every device of an `apply` call is planned before any is
// committed, so one bad device rejects the whole intent.

use chrono::Utc;
use edgeplane_api::DeviceRequest;

use super::capabilities::{Capabilities, ModifyShape};
use super::requests::{DeviceUpdate, DhcpRequest, Intent, StaticRouteRequest};
use super::{Dispatcher, tasks};
use crate::error::CoreError;
use crate::model::{
    ChangeAction, Device, DhcpServer, EntityId, Interface, InterfaceType, ItemStatus, JobResponse,
    Operation, StaticRoute, SyncStatus,
};
use crate::validate::{
    validate_device, validate_dhcp, validate_interface_changes, validate_org_lan_overlap,
    validate_static_route,
};

/// Document change staged by a plan.
#[derive(Debug, Clone)]
pub(super) enum Change {
    Nothing,
    PushDhcp(DhcpServer),
    ReplaceDhcp(DhcpServer),
    DhcpStatus(EntityId, ItemStatus),
    DeleteDhcp(EntityId),
    PushRoute(StaticRoute),
    RouteStatus(EntityId, ItemStatus),
    DeleteRoute(EntityId),
    Interfaces(Vec<Interface>),
    RestartSync,
}

impl Change {
    pub(super) fn apply(&self, device: &mut Device) {
        match self {
            Self::Nothing => {}
            Self::PushDhcp(dhcp) => device.dhcp.push(dhcp.clone()),
            Self::ReplaceDhcp(dhcp) => {
                if let Some(entry) = device.dhcp.iter_mut().find(|d| d.id == dhcp.id) {
                    *entry = dhcp.clone();
                }
            }
            Self::DhcpStatus(id, status) => {
                if let Some(entry) = device.dhcp.iter_mut().find(|d| d.id == *id) {
                    entry.status = *status;
                }
            }
            Self::DeleteDhcp(id) => device.dhcp.retain(|d| d.id != *id),
            Self::PushRoute(route) => device.static_routes.push(route.clone()),
            Self::RouteStatus(id, status) => {
                if let Some(route) = device.static_routes.iter_mut().find(|r| r.id == *id) {
                    route.status = *status;
                }
            }
            Self::DeleteRoute(id) => device.static_routes.retain(|r| r.id != *id),
            Self::Interfaces(interfaces) => device.interfaces.clone_from(interfaces),
            Self::RestartSync => {
                device.sync.trials = 0;
                device.sync.state = SyncStatus::Syncing;
                device.sync.last_attempt = Some(Utc::now());
            }
        }
    }
}

/// What one device gets out of an intent.
#[derive(Debug)]
pub(super) struct Planned {
    pub change: Change,
    /// Tasks and the response descriptor, if the agent must be told.
    pub work: Option<(Vec<DeviceRequest>, JobResponse)>,
}

impl Planned {
    fn store_only(change: Change) -> Self {
        Self { change, work: None }
    }

    fn job(change: Change, tasks: Vec<DeviceRequest>, response: JobResponse) -> Self {
        Self {
            change,
            work: Some((tasks, response)),
        }
    }
}

impl Dispatcher {
    /// Plan one device. The agent's capabilities are negotiated once
    /// here and shape every configuration change sent to it.
    pub(super) fn plan(&self, device: &Device, intent: &Intent) -> Result<Planned, CoreError> {
        let caps = Capabilities::negotiate(&self.versions_of(device));
        let item = match intent {
            Intent::AddDhcp(request) => plan_add_dhcp(device, request)?,
            Intent::ModifyDhcp { dhcp_id, request } => plan_modify_dhcp(device, dhcp_id, request)?,
            Intent::RemoveDhcp { dhcp_id, force } => plan_remove_dhcp(device, dhcp_id, *force)?,
            Intent::AddStaticRoute(request) => plan_add_route(device, request)?,
            Intent::RemoveStaticRoute { route_id } => plan_remove_route(device, route_id)?,
            Intent::ModifyDevice(update) => return self.plan_modify_device(device, update, caps),
            Intent::StartRouter => {
                validate_device(device, true)?;
                let desired = self.desired_for(device);
                return Ok(Planned::job(
                    Change::Nothing,
                    vec![tasks::start_router(desired)],
                    JobResponse::Router {
                        device_id: device.id.clone(),
                        start: true,
                    },
                ));
            }
            Intent::StopRouter => {
                return Ok(Planned::job(
                    Change::Nothing,
                    vec![tasks::stop_router()],
                    JobResponse::Router {
                        device_id: device.id.clone(),
                        start: false,
                    },
                ));
            }
            Intent::Sync => {
                if self
                    .queue
                    .has_outstanding(&device.machine_id, Some(Operation::Sync))
                {
                    return Err(CoreError::conflict(format!(
                        "a sync job for {} is already pending",
                        device.label()
                    )));
                }
                let desired = self.desired_for(device);
                return Ok(Planned::job(
                    Change::RestartSync,
                    vec![tasks::sync_device(desired)],
                    JobResponse::Sync {
                        device_id: device.id.clone(),
                    },
                ));
            }
        };
        Ok(self.shape_item_change(device, item, caps))
    }

    /// Per-field agents keep the item tasks. Consolidated agents get one
    /// `modify-device` with the document as it stands after the change;
    /// the response descriptor is kept so reconciliation is the same.
    fn shape_item_change(&self, device: &Device, planned: Planned, caps: Capabilities) -> Planned {
        let Planned { change, work } = planned;
        let work = match (caps.modify, work) {
            (ModifyShape::Consolidated, Some((_, response))) => {
                let mut candidate = device.clone();
                change.apply(&mut candidate);
                Some((vec![tasks::modify_device(self.desired_for(&candidate))], response))
            }
            (_, work) => work,
        };
        Planned { change, work }
    }

    fn plan_modify_device(
        &self,
        device: &Device,
        update: &DeviceUpdate,
        caps: Capabilities,
    ) -> Result<Planned, CoreError> {
        if self
            .queue
            .has_outstanding(&device.machine_id, Some(Operation::Modify))
        {
            return Err(CoreError::conflict(format!(
                "a configuration change for {} is still pending",
                device.label()
            )));
        }

        let tunnels = self.store.active_tunnels_for_device(&device.id);
        validate_interface_changes(device, &update.interfaces, &tunnels)?;

        let mut changed = Vec::new();
        let mut candidate = device.clone();
        for current in &mut candidate.interfaces {
            let Some(proposed) = update.interfaces.iter().find(|p| p.id == current.id) else {
                continue;
            };
            if !proposed.same_config(current) {
                *current = proposed.clone();
                current.modified = true;
                changed.push(current.id.clone());
            }
        }

        validate_device(&candidate, device.is_running)?;
        check_dependents(&candidate)?;
        if let Some(org) = self.store.organization(&device.org) {
            if org.forbid_lan_overlap {
                let others = self.store.org_devices_except(&device.org, &device.id);
                validate_org_lan_overlap(&candidate, &others)?;
            }
        }

        if changed.is_empty() {
            return Ok(Planned::store_only(Change::Nothing));
        }

        let steps = match caps.modify {
            ModifyShape::PerField => candidate
                .interfaces
                .iter()
                .filter(|i| changed.contains(&i.id))
                .map(tasks::modify_interface)
                .collect(),
            ModifyShape::Consolidated => {
                vec![tasks::modify_device(tasks::desired_config(&candidate, &tunnels))]
            }
        };

        Ok(Planned::job(
            Change::Interfaces(candidate.interfaces),
            steps,
            JobResponse::Modify {
                device_id: device.id.clone(),
                interfaces: changed,
            },
        ))
    }
}

/// DHCP servers and pinned routes need their interface to stay usable.
fn check_dependents(candidate: &Device) -> Result<(), CoreError> {
    for dhcp in candidate
        .dhcp
        .iter()
        .filter(|d| d.status.is_desired() || d.status.is_pending())
    {
        let usable = candidate
            .interface(&dhcp.interface)
            .is_some_and(|i| i.is_assigned_as(InterfaceType::Lan));
        if !usable {
            return Err(CoreError::conflict(format!(
                "interface {} serves DHCP and must stay an assigned LAN",
                dhcp.interface
            )));
        }
    }
    for route in candidate
        .static_routes
        .iter()
        .filter(|r| r.status.is_desired() || r.status.is_pending())
    {
        let Some(dev_id) = &route.interface else {
            continue;
        };
        if !candidate.interface(dev_id).is_some_and(|i| i.is_assigned) {
            return Err(CoreError::conflict(format!(
                "interface {dev_id} carries the route to {} and must stay assigned",
                route.destination
            )));
        }
    }
    Ok(())
}

// ── DHCP ───────────────────────────────────────────────────────────

fn dhcp_from_request(id: EntityId, request: &DhcpRequest) -> DhcpServer {
    DhcpServer {
        id,
        interface: request.interface.clone(),
        range_start: request.range_start,
        range_end: request.range_end,
        dns: request.dns.clone(),
        mac_assign: request.mac_assign.clone(),
        status: ItemStatus::AddWait,
    }
}

fn plan_add_dhcp(device: &Device, request: &DhcpRequest) -> Result<Planned, CoreError> {
    if let Some(existing) = device.dhcp.iter().find(|d| d.interface == request.interface) {
        return Err(CoreError::conflict(format!(
            "{} already has DHCP server {} on {}",
            device.label(),
            existing.id,
            request.interface
        )));
    }
    let dhcp = dhcp_from_request(EntityId::generate(), request);
    validate_dhcp(device, &dhcp)?;
    Ok(Planned::job(
        Change::PushDhcp(dhcp.clone()),
        vec![tasks::add_dhcp(&dhcp)],
        JobResponse::Dhcp {
            device_id: device.id.clone(),
            dhcp_id: dhcp.id,
            action: ChangeAction::Add,
        },
    ))
}

fn existing_dhcp<'a>(device: &'a Device, dhcp_id: &EntityId) -> Result<&'a DhcpServer, CoreError> {
    let existing = device
        .dhcp_server(dhcp_id)
        .ok_or_else(|| CoreError::not_found("dhcp server", dhcp_id))?;
    if existing.status.is_pending() {
        return Err(CoreError::conflict(format!(
            "DHCP server {dhcp_id} on {} has a job pending",
            device.label()
        )));
    }
    Ok(existing)
}

fn plan_modify_dhcp(
    device: &Device,
    dhcp_id: &EntityId,
    request: &DhcpRequest,
) -> Result<Planned, CoreError> {
    let existing = existing_dhcp(device, dhcp_id)?;
    if let Some(other) = device
        .dhcp
        .iter()
        .find(|d| d.id != *dhcp_id && d.interface == request.interface)
    {
        return Err(CoreError::conflict(format!(
            "{} already has DHCP server {} on {}",
            device.label(),
            other.id,
            request.interface
        )));
    }

    let updated = dhcp_from_request(dhcp_id.clone(), request);
    validate_dhcp(device, &updated)?;

    // The agent replaces a server by dropping the old one first.
    let mut steps = Vec::with_capacity(2);
    if existing.status.is_desired() {
        steps.push(tasks::remove_dhcp(existing));
    }
    steps.push(tasks::add_dhcp(&updated));

    Ok(Planned::job(
        Change::ReplaceDhcp(updated),
        steps,
        JobResponse::Dhcp {
            device_id: device.id.clone(),
            dhcp_id: dhcp_id.clone(),
            action: ChangeAction::Modify,
        },
    ))
}

fn plan_remove_dhcp(device: &Device, dhcp_id: &EntityId, force: bool) -> Result<Planned, CoreError> {
    let existing = existing_dhcp(device, dhcp_id)?;
    if !existing.status.is_desired() {
        if force {
            return Ok(Planned::store_only(Change::DeleteDhcp(dhcp_id.clone())));
        }
        return Err(CoreError::conflict(format!(
            "DHCP server {dhcp_id} is {} and was never applied, remove it with force",
            existing.status
        )));
    }
    Ok(Planned::job(
        Change::DhcpStatus(dhcp_id.clone(), ItemStatus::DelWait),
        vec![tasks::remove_dhcp(existing)],
        JobResponse::Dhcp {
            device_id: device.id.clone(),
            dhcp_id: dhcp_id.clone(),
            action: ChangeAction::Remove,
        },
    ))
}

// ── Static routes ──────────────────────────────────────────────────

fn plan_add_route(device: &Device, request: &StaticRouteRequest) -> Result<Planned, CoreError> {
    let route = StaticRoute {
        id: EntityId::generate(),
        destination: request.destination,
        gateway: request.gateway,
        interface: request.interface.clone(),
        metric: request.metric,
        status: ItemStatus::AddWait,
    };
    validate_static_route(device, &route)?;
    Ok(Planned::job(
        Change::PushRoute(route.clone()),
        vec![tasks::add_route(&route)],
        JobResponse::StaticRoutes {
            device_id: device.id.clone(),
            route_id: route.id,
            action: ChangeAction::Add,
        },
    ))
}

fn plan_remove_route(device: &Device, route_id: &EntityId) -> Result<Planned, CoreError> {
    let route = device
        .static_route(route_id)
        .ok_or_else(|| CoreError::not_found("static route", route_id))?;
    if route.status.is_pending() {
        return Err(CoreError::conflict(format!(
            "route {route_id} on {} has a job pending",
            device.label()
        )));
    }
    if !route.status.is_desired() {
        // Never reached the device.
        return Ok(Planned::store_only(Change::DeleteRoute(route_id.clone())));
    }
    Ok(Planned::job(
        Change::RouteStatus(route_id.clone(), ItemStatus::DelWait),
        vec![tasks::remove_route(route)],
        JobResponse::StaticRoutes {
            device_id: device.id.clone(),
            route_id: route_id.clone(),
            action: ChangeAction::Remove,
        },
    ))
}
