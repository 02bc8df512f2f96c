use std::collections::HashSet;

use super::Rejection;
use crate::model::{Device, DhcpServer, InterfaceType};

/// Check a DHCP server definition against the device it targets.
pub fn validate_dhcp(device: &Device, dhcp: &DhcpServer) -> Result<(), Rejection> {
    let Some(iface) = device.interface(&dhcp.interface) else {
        return Err(Rejection::invalid(format!(
            "interface {} does not exist on {}",
            dhcp.interface,
            device.label()
        )));
    };
    if !iface.is_assigned {
        return Err(Rejection::invalid(format!(
            "interface {} is not assigned",
            iface.name
        )));
    }
    if iface.kind != Some(InterfaceType::Lan) {
        return Err(Rejection::invalid(format!(
            "DHCP can only run on a LAN interface, {} is not LAN",
            iface.name
        )));
    }

    let Some(subnet) = iface.subnet() else {
        return Err(Rejection::invalid(format!(
            "interface {} has no IPv4 subnet",
            iface.name
        )));
    };
    if dhcp.range_start > dhcp.range_end {
        return Err(Rejection::invalid(format!(
            "range start {} is after range end {}",
            dhcp.range_start, dhcp.range_end
        )));
    }
    for addr in [dhcp.range_start, dhcp.range_end] {
        if !subnet.contains(&addr) {
            return Err(Rejection::invalid(format!(
                "range address {addr} is outside {subnet}"
            )));
        }
    }

    let mut macs = HashSet::new();
    let mut hosts = HashSet::new();
    let mut ips = HashSet::new();
    for entry in &dhcp.mac_assign {
        if !entry.mac.is_well_formed() {
            return Err(Rejection::invalid(format!("invalid MAC address {}", entry.mac)));
        }
        if !macs.insert(entry.mac.as_str()) {
            return Err(Rejection::invalid(format!("duplicate MAC address {}", entry.mac)));
        }
        if !hosts.insert(entry.host.as_str()) {
            return Err(Rejection::invalid(format!("duplicate host name {}", entry.host)));
        }
        if !ips.insert(entry.ipv4) {
            return Err(Rejection::invalid(format!("duplicate IP address {}", entry.ipv4)));
        }
    }

    Ok(())
}
