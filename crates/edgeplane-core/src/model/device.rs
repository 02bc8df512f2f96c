// ── Device domain types ──
//
// A device owns its interfaces, static routes and DHCP servers as
// ordered sub-document arrays. Routes and DHCP entries carry their own
// lifecycle status, driven only by job outcomes.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use edgeplane_api::{AgentVersions, MachineId};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{EntityId, MacAddress};

// ── Interfaces ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum InterfaceType {
    Wan,
    Lan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RoutingProtocol {
    #[default]
    None,
    Ospf,
    Bgp,
}

/// One physical or virtual port on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub id: EntityId,
    /// Hardware port identity the agent addresses, e.g. `pci:0000:00:03.00`.
    pub dev_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_assigned: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<InterfaceType>,
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv4_mask: Option<u8>,
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub routing: RoutingProtocol,
    #[serde(default)]
    pub path_labels: Vec<EntityId>,
    /// Set while a modify job carrying this interface is outstanding.
    #[serde(default)]
    pub modified: bool,
}

impl Interface {
    /// The interface's network (host bits cleared), if addressed.
    pub fn subnet(&self) -> Option<Ipv4Net> {
        let net = Ipv4Net::new(self.ipv4?, self.ipv4_mask?).ok()?;
        Some(net.trunc())
    }

    pub fn is_assigned_as(&self, kind: InterfaceType) -> bool {
        self.is_assigned && self.kind == Some(kind)
    }

    /// Equal in everything an operator can change.
    pub fn same_config(&self, other: &Interface) -> bool {
        let mut a = self.clone();
        a.modified = other.modified;
        a == *other
    }
}

// ── Sub-document lifecycle ──────────────────────────────────────────

/// Lifecycle of a route or DHCP entry (and of each tunnel side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ItemStatus {
    AddWait,
    Complete,
    AddFailed,
    DelWait,
    RemoveFailed,
    JobDeleted,
}

impl ItemStatus {
    /// A job for this item is outstanding.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::AddWait | Self::DelWait)
    }

    /// The item belongs in the configuration the device should hold.
    ///
    /// Failed or cancelled additions are excluded and in-flight removals
    /// already count as gone. A failed removal stays: the device still
    /// has it and nothing re-sends the removal on its own.
    pub fn is_desired(self) -> bool {
        matches!(self, Self::AddWait | Self::Complete | Self::RemoveFailed)
    }
}

/// Operator-defined route on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRoute {
    pub id: EntityId,
    pub destination: Ipv4Net,
    pub gateway: Ipv4Addr,
    /// `dev_id` of the egress interface, if pinned.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub metric: Option<u32>,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacAssignment {
    pub host: String,
    pub mac: MacAddress,
    pub ipv4: Ipv4Addr,
}

/// DHCP server bound to one LAN interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpServer {
    pub id: EntityId,
    /// `dev_id` of the LAN interface it serves.
    pub interface: String,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
    #[serde(default)]
    pub mac_assign: Vec<MacAssignment>,
    pub status: ItemStatus,
}

// ── Sync block ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    Syncing,
    NotSynced,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(default)]
    pub state: SyncStatus,
    /// Desired-configuration fingerprint at the last check.
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub trials: u32,
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
}

fn default_auto_sync() -> bool {
    true
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            state: SyncStatus::Unknown,
            hash: String::new(),
            trials: 0,
            auto_sync: true,
            last_attempt: None,
        }
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// An edge device as the control plane persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: EntityId,
    pub org: EntityId,
    pub machine_id: MachineId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub versions: AgentVersions,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
    #[serde(default)]
    pub dhcp: Vec<DhcpServer>,
    #[serde(default)]
    pub sync: SyncState,
}

impl Device {
    /// Look up an interface by its port identity.
    pub fn interface(&self, dev_id: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.dev_id == dev_id)
    }

    pub fn interface_by_id(&self, id: &EntityId) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.id == *id)
    }

    pub fn dhcp_server(&self, id: &EntityId) -> Option<&DhcpServer> {
        self.dhcp.iter().find(|d| d.id == *id)
    }

    pub fn static_route(&self, id: &EntityId) -> Option<&StaticRoute> {
        self.static_routes.iter().find(|r| r.id == *id)
    }

    /// Assigned interfaces of one type.
    pub fn assigned(&self, kind: InterfaceType) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter().filter(move |i| i.is_assigned_as(kind))
    }

    /// Display name, falling back to the machine id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.machine_id.as_str()
        } else {
            &self.name
        }
    }
}

/// Tenant that owns devices and tunnels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    /// Licensed device counter.
    #[serde(default)]
    pub device_count: u32,
    /// Reject LAN subnets that overlap another device's LAN in this org.
    #[serde(default)]
    pub forbid_lan_overlap: bool,
}
