// ── Agent task builders ──
//
// Every message the control plane sends is built here, so the set of
// agent-facing verbs lives in one place.

use std::sync::Arc;

use edgeplane_api::DeviceRequest;
use serde_json::{Value, json};

use super::requests::ReadRequest;
use crate::model::{Device, DhcpServer, Interface, StaticRoute, Tunnel, TunnelSide};

const FINGERPRINT_QUERY: &str = "get-device-config-hash";

// ── Documents ──────────────────────────────────────────────────────

/// The configuration the device should hold: assigned interfaces, plus
/// the routes, DHCP servers and tunnel sides still wanted on it.
///
/// Keys are sorted (serde_json's default map), so the serialized form
/// is stable and suitable for fingerprinting.
pub fn desired_config(device: &Device, tunnels: &[Arc<Tunnel>]) -> Value {
    let interfaces: Vec<Value> = device
        .interfaces
        .iter()
        .filter(|i| i.is_assigned)
        .map(interface_params)
        .collect();
    let routes: Vec<Value> = device
        .static_routes
        .iter()
        .filter(|r| r.status.is_desired())
        .map(route_params)
        .collect();
    let dhcp: Vec<Value> = device
        .dhcp
        .iter()
        .filter(|d| d.status.is_desired())
        .map(dhcp_params)
        .collect();

    let mut own: Vec<(u32, Value)> = tunnels
        .iter()
        .filter(|t| t.is_active)
        .filter_map(|t| {
            let side = t.side_of(&device.id)?;
            let end = t.end(side);
            if !end.is_wanted() {
                return None;
            }
            let local = device.interface_by_id(&end.interface)?;
            Some((t.num, tunnel_params(t, side, local)))
        })
        .collect();
    own.sort_by_key(|(num, _)| *num);
    let tunnels: Vec<Value> = own.into_iter().map(|(_, v)| v).collect();

    json!({
        "interfaces": interfaces,
        "routes": routes,
        "dhcp": dhcp,
        "tunnels": tunnels,
    })
}

fn interface_params(iface: &Interface) -> Value {
    let addr = iface
        .ipv4
        .zip(iface.ipv4_mask)
        .map(|(ip, mask)| format!("{ip}/{mask}"));
    json!({
        "devId": iface.dev_id,
        "name": iface.name,
        "isAssigned": iface.is_assigned,
        "type": iface.kind,
        "addr": addr,
        "gateway": iface.gateway,
        "routing": iface.routing,
        "pathlabels": iface.path_labels,
    })
}

fn route_params(route: &StaticRoute) -> Value {
    json!({
        "destination": route.destination.to_string(),
        "gateway": route.gateway,
        "ifname": route.interface,
        "metric": route.metric,
    })
}

fn dhcp_params(dhcp: &DhcpServer) -> Value {
    json!({
        "interface": dhcp.interface,
        "range_start": dhcp.range_start,
        "range_end": dhcp.range_end,
        "dns": dhcp.dns,
        "mac_assign": dhcp.mac_assign,
    })
}

fn tunnel_params(tunnel: &Tunnel, side: TunnelSide, local: &Interface) -> Value {
    json!({
        "num": tunnel.num,
        "side": side,
        "devId": local.dev_id,
        "encryption": tunnel.encryption,
        "pathlabel": tunnel.path_label,
    })
}

// ── Job tasks ──────────────────────────────────────────────────────

pub(super) fn add_dhcp(dhcp: &DhcpServer) -> DeviceRequest {
    DeviceRequest::agent("add-dhcp-config").with_params(dhcp_params(dhcp))
}

pub(super) fn remove_dhcp(dhcp: &DhcpServer) -> DeviceRequest {
    DeviceRequest::agent("remove-dhcp-config").with_params(dhcp_params(dhcp))
}

pub(super) fn add_route(route: &StaticRoute) -> DeviceRequest {
    DeviceRequest::agent("add-route").with_params(route_params(route))
}

pub(super) fn remove_route(route: &StaticRoute) -> DeviceRequest {
    DeviceRequest::agent("remove-route").with_params(route_params(route))
}

pub(super) fn modify_interface(iface: &Interface) -> DeviceRequest {
    DeviceRequest::agent("modify-interface").with_params(interface_params(iface))
}

pub(super) fn modify_device(desired: Value) -> DeviceRequest {
    DeviceRequest::agent("modify-device").with_params(desired)
}

pub(super) fn start_router(desired: Value) -> DeviceRequest {
    DeviceRequest::agent("start-router").with_params(desired)
}

pub(super) fn stop_router() -> DeviceRequest {
    DeviceRequest::agent("stop-router")
}

pub(crate) fn sync_device(desired: Value) -> DeviceRequest {
    DeviceRequest::agent("sync-device").with_params(desired)
}

/// `remote` is the peer interface, which supplies the far-end address.
pub(super) fn add_tunnel(
    tunnel: &Tunnel,
    side: TunnelSide,
    local: &Interface,
    remote: &Interface,
) -> DeviceRequest {
    let mut params = tunnel_params(tunnel, side, local);
    params["src"] = json!(local.ipv4);
    params["dst"] = json!(remote.ipv4);
    DeviceRequest::agent("add-tunnel").with_params(params)
}

pub(super) fn remove_tunnel(tunnel: &Tunnel, side: TunnelSide) -> DeviceRequest {
    DeviceRequest::agent("remove-tunnel").with_params(json!({
        "num": tunnel.num,
        "side": side,
    }))
}

pub(crate) fn fingerprint_query() -> DeviceRequest {
    DeviceRequest::agent(FINGERPRINT_QUERY)
}

pub(super) fn read(request: ReadRequest) -> DeviceRequest {
    match request {
        ReadRequest::Status => DeviceRequest::agent("get-device-status"),
        ReadRequest::Logs { lines } => {
            DeviceRequest::agent("get-device-logs").with_params(json!({ "lines": lines }))
        }
        ReadRequest::Trace => DeviceRequest::agent("get-device-packet-traces"),
    }
}
