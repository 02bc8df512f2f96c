// ── Typed intent payloads ──
//
// What an operator can ask the dispatcher to do. Each variant carries
// only the fields the operator supplies; ids and statuses are assigned
// by the dispatcher.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::model::{EncryptionMethod, EntityId, Interface, MacAssignment};

// ── DHCP ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpRequest {
    /// `dev_id` of the LAN interface to serve.
    pub interface: String,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
    #[serde(default)]
    pub mac_assign: Vec<MacAssignment>,
}

// ── Static routes ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRouteRequest {
    pub destination: Ipv4Net,
    pub gateway: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<u32>,
}

// ── Device ─────────────────────────────────────────────────────────

/// Replacement interface list. Every existing interface must appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub interfaces: Vec<Interface>,
}

// ── Tunnels ────────────────────────────────────────────────────────

/// One tunnel between WAN interfaces of two devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRequest {
    pub device_a: EntityId,
    pub interface_a: EntityId,
    pub device_b: EntityId,
    pub interface_b: EntityId,
    #[serde(default)]
    pub encryption: EncryptionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_label: Option<EntityId>,
}

// ── Intents ────────────────────────────────────────────────────────

/// A change applied to every device of one `apply` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    AddDhcp(DhcpRequest),
    ModifyDhcp {
        dhcp_id: EntityId,
        request: DhcpRequest,
    },
    /// `force` deletes an entry the device never acknowledged without
    /// sending anything.
    RemoveDhcp {
        dhcp_id: EntityId,
        force: bool,
    },
    AddStaticRoute(StaticRouteRequest),
    RemoveStaticRoute {
        route_id: EntityId,
    },
    ModifyDevice(DeviceUpdate),
    StartRouter,
    StopRouter,
    /// Push the full desired configuration and reset the sync trials.
    Sync,
}

/// Reads answered by the agent right away, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRequest {
    Status,
    Logs { lines: u32 },
    Trace,
}
