use std::sync::Arc;

use super::Rejection;
use crate::model::{Device, EntityId, Interface, InterfaceType, Tunnel};

/// Check a replacement interface list against the device's current one.
///
/// Interfaces may be reconfigured but never dropped or added, and an
/// interface carrying an active tunnel must stay an assigned WAN that
/// keeps the tunnel's path label.
pub fn validate_interface_changes(
    current: &Device,
    proposed: &[Interface],
    tunnels: &[Arc<Tunnel>],
) -> Result<(), Rejection> {
    for existing in &current.interfaces {
        match proposed.iter().find(|p| p.id == existing.id) {
            None => {
                return Err(Rejection::invalid(format!(
                    "interface {} cannot be removed, unassign it instead",
                    existing.name
                )));
            }
            Some(p) if p.dev_id != existing.dev_id => {
                return Err(Rejection::invalid(format!(
                    "interface {} cannot change its port from {} to {}",
                    existing.name, existing.dev_id, p.dev_id
                )));
            }
            Some(_) => {}
        }
    }
    if let Some(unknown) = proposed
        .iter()
        .find(|p| current.interface_by_id(&p.id).is_none())
    {
        return Err(Rejection::invalid(format!(
            "interface {} does not exist on {}",
            unknown.id,
            current.label()
        )));
    }

    for tunnel in tunnels.iter().filter(|t| t.is_active) {
        let Some(side) = tunnel.side_of(&current.id) else {
            continue;
        };
        let end = tunnel.end(side);
        let Some(iface) = proposed.iter().find(|p| p.id == end.interface) else {
            continue;
        };
        if !iface.is_assigned_as(InterfaceType::Wan) {
            return Err(Rejection::conflict(format!(
                "interface {} is used by active tunnel {}",
                iface.name, tunnel.num
            )));
        }
        if let Some(label) = &tunnel.path_label {
            if !iface.path_labels.contains(label) {
                return Err(Rejection::conflict(format!(
                    "path label {label} on {} is used by active tunnel {}",
                    iface.name, tunnel.num
                )));
            }
        }
    }

    Ok(())
}

/// Check that `interface` on `device` can terminate a tunnel.
pub fn validate_tunnel_endpoint(
    device: &Device,
    interface: &EntityId,
    path_label: Option<&EntityId>,
) -> Result<(), Rejection> {
    let Some(iface) = device.interface_by_id(interface) else {
        return Err(Rejection::invalid(format!(
            "interface {interface} does not exist on {}",
            device.label()
        )));
    };
    if !iface.is_assigned_as(InterfaceType::Wan) {
        return Err(Rejection::invalid(format!(
            "tunnels must terminate on an assigned WAN interface, {} on {} is not",
            iface.name,
            device.label()
        )));
    }
    if iface.subnet().is_none() {
        return Err(Rejection::invalid(format!(
            "interface {} on {} has no IPv4 address",
            iface.name,
            device.label()
        )));
    }
    if let Some(label) = path_label {
        if !iface.path_labels.contains(label) {
            return Err(Rejection::invalid(format!(
                "interface {} on {} does not carry path label {label}",
                iface.name,
                device.label()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{active_tunnel, lan_wan_device};

    #[test]
    fn reconfiguring_is_fine() {
        let device = lan_wan_device("a", "m");
        let mut proposed = device.interfaces.clone();
        proposed[2].name = "spare".into();
        validate_interface_changes(&device, &proposed, &[]).unwrap();
    }

    #[test]
    fn dropping_or_inventing_interfaces_is_rejected() {
        let device = lan_wan_device("a", "m");
        let mut proposed = device.interfaces.clone();
        proposed.pop();
        let err = validate_interface_changes(&device, &proposed, &[]).unwrap_err();
        assert!(err.reason().contains("cannot be removed"));

        let mut proposed = device.interfaces.clone();
        proposed[2].id = "ghost".into();
        assert!(validate_interface_changes(&device, &proposed, &[]).is_err());
    }

    #[test]
    fn unassigning_tunnel_interface_is_a_conflict() {
        let device = lan_wan_device("a", "m");
        let tunnels = [Arc::new(active_tunnel("t", "a", "b"))];
        let mut proposed = device.interfaces.clone();
        proposed[0].is_assigned = false;
        let err = validate_interface_changes(&device, &proposed, &tunnels).unwrap_err();
        assert!(matches!(err, Rejection::Conflict { .. }));

        let mut inactive = active_tunnel("t", "a", "b");
        inactive.is_active = false;
        validate_interface_changes(&device, &proposed, &[Arc::new(inactive)]).unwrap();
    }

    #[test]
    fn removing_tunnel_path_label_is_a_conflict() {
        let mut device = lan_wan_device("a", "m");
        device.interfaces[0].path_labels = vec!["gold".into()];
        let mut tunnel = active_tunnel("t", "a", "b");
        tunnel.path_label = Some("gold".into());

        let mut proposed = device.interfaces.clone();
        proposed[0].path_labels.clear();
        let err = validate_interface_changes(&device, &proposed, &[Arc::new(tunnel)]).unwrap_err();
        assert!(matches!(err, Rejection::Conflict { .. }));
    }

    #[test]
    fn tunnel_endpoint_must_be_wan_with_label() {
        let mut device = lan_wan_device("a", "m");
        validate_tunnel_endpoint(&device, &"wan0".into(), None).unwrap();
        assert!(validate_tunnel_endpoint(&device, &"lan0".into(), None).is_err());
        assert!(validate_tunnel_endpoint(&device, &"wan0".into(), Some(&"gold".into())).is_err());
        device.interfaces[0].path_labels.push("gold".into());
        validate_tunnel_endpoint(&device, &"wan0".into(), Some(&"gold".into())).unwrap();
    }
}
