// ── Tunnel domain types ──
//
// A tunnel joins two (device, interface) pairs. Devices never point back
// at their tunnels; the store answers "which tunnels use this device" on
// demand.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::device::ItemStatus;
use super::ids::EntityId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EncryptionMethod {
    #[default]
    Psk,
    Ikev2,
    None,
}

/// Which end of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TunnelSide {
    A,
    B,
}

impl TunnelSide {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEnd {
    pub device: EntityId,
    /// Interface id (not `dev_id`) on that device.
    pub interface: EntityId,
    pub status: ItemStatus,
    /// The device confirmed `remove-tunnel`. `status` alone cannot say
    /// this, since `Complete` also follows a confirmed add.
    #[serde(default)]
    pub removed: bool,
}

impl TunnelEnd {
    pub fn new(device: EntityId, interface: EntityId) -> Self {
        Self {
            device,
            interface,
            status: ItemStatus::AddWait,
            removed: false,
        }
    }

    /// Whether the device should hold this side of the tunnel.
    pub fn is_wanted(&self) -> bool {
        !self.removed && self.status.is_desired()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tunnel {
    pub id: EntityId,
    pub org: EntityId,
    /// Per-organization tunnel number, used by agents to derive addressing.
    pub num: u32,
    pub a: TunnelEnd,
    pub b: TunnelEnd,
    pub is_active: bool,
    #[serde(default)]
    pub encryption: EncryptionMethod,
    #[serde(default)]
    pub path_label: Option<EntityId>,
}

impl Tunnel {
    pub fn end(&self, side: TunnelSide) -> &TunnelEnd {
        match side {
            TunnelSide::A => &self.a,
            TunnelSide::B => &self.b,
        }
    }

    pub fn end_mut(&mut self, side: TunnelSide) -> &mut TunnelEnd {
        match side {
            TunnelSide::A => &mut self.a,
            TunnelSide::B => &mut self.b,
        }
    }

    pub fn both_removed(&self) -> bool {
        self.a.removed && self.b.removed
    }

    pub fn references_device(&self, device: &EntityId) -> bool {
        self.a.device == *device || self.b.device == *device
    }

    /// Whether the tunnel terminates on this device's interface.
    pub fn uses_interface(&self, device: &EntityId, interface: &EntityId) -> bool {
        [&self.a, &self.b]
            .iter()
            .any(|end| end.device == *device && end.interface == *interface)
    }

    /// The side that terminates on `device`, if any. A tunnel never has
    /// both ends on one device.
    pub fn side_of(&self, device: &EntityId) -> Option<TunnelSide> {
        if self.a.device == *device {
            Some(TunnelSide::A)
        } else if self.b.device == *device {
            Some(TunnelSide::B)
        } else {
            None
        }
    }
}
