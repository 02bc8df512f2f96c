use serde::{Deserialize, Serialize};

use crate::model::{Device, Organization, Tunnel};

/// Serializable dump of every persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub tunnels: Vec<Tunnel>,
}
