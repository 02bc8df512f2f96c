use std::collections::HashSet;
use std::sync::Arc;

use ipnet::Ipv4Net;

use super::Rejection;
use super::network::subnets_overlap;
use crate::model::{Device, Interface, InterfaceType, RoutingProtocol};

/// Check the interface invariants of one device.
///
/// With `require_runnable`, the device must also have at least one
/// assigned WAN and one assigned LAN interface.
pub fn validate_device(device: &Device, require_runnable: bool) -> Result<(), Rejection> {
    let mut seen = HashSet::new();
    for iface in &device.interfaces {
        if !seen.insert(iface.dev_id.as_str()) {
            return Err(Rejection::invalid(format!(
                "port {} appears more than once",
                iface.dev_id
            )));
        }
        if iface.is_assigned {
            validate_assigned(iface)?;
        }
    }

    let addressed: Vec<(&Interface, Ipv4Net)> = device
        .interfaces
        .iter()
        .filter(|i| i.is_assigned)
        .filter_map(|i| i.subnet().map(|net| (i, net)))
        .collect();

    for (idx, (a, net_a)) in addressed.iter().enumerate() {
        for (b, net_b) in addressed.iter().skip(idx + 1) {
            let involves_lan =
                a.kind == Some(InterfaceType::Lan) || b.kind == Some(InterfaceType::Lan);
            if involves_lan && subnets_overlap(net_a, net_b) {
                return Err(Rejection::invalid(format!(
                    "subnets of {} ({net_a}) and {} ({net_b}) overlap",
                    a.name, b.name
                )));
            }
        }
    }

    if require_runnable {
        if device.assigned(InterfaceType::Wan).next().is_none() {
            return Err(Rejection::invalid(
                "device needs at least one assigned WAN interface",
            ));
        }
        if device.assigned(InterfaceType::Lan).next().is_none() {
            return Err(Rejection::invalid(
                "device needs at least one assigned LAN interface",
            ));
        }
    }

    Ok(())
}

fn validate_assigned(iface: &Interface) -> Result<(), Rejection> {
    let name = &iface.name;
    if iface.ipv4_mask.is_some_and(|m| m > 32) {
        return Err(Rejection::invalid(format!("interface {name} has an invalid mask")));
    }

    match iface.kind {
        None => Err(Rejection::invalid(format!(
            "assigned interface {name} must be WAN or LAN"
        ))),
        Some(InterfaceType::Lan) => {
            if iface.subnet().is_none() {
                return Err(Rejection::invalid(format!(
                    "LAN interface {name} needs an IPv4 address and mask"
                )));
            }
            if iface.gateway.is_some() {
                return Err(Rejection::invalid(format!(
                    "LAN interface {name} must not have a gateway"
                )));
            }
            if !iface.path_labels.is_empty() {
                return Err(Rejection::invalid(format!(
                    "LAN interface {name} must not carry path labels"
                )));
            }
            Ok(())
        }
        Some(InterfaceType::Wan) => {
            if iface.gateway.is_none() {
                return Err(Rejection::invalid(format!(
                    "WAN interface {name} needs a gateway"
                )));
            }
            if iface.routing == RoutingProtocol::Ospf {
                return Err(Rejection::invalid(format!(
                    "OSPF is not allowed on WAN interface {name}"
                )));
            }
            Ok(())
        }
    }
}

/// Reject a LAN subnet of `candidate` that overlaps a LAN subnet of any
/// device in `others` (the rest of the organization).
pub fn validate_org_lan_overlap(candidate: &Device, others: &[Arc<Device>]) -> Result<(), Rejection> {
    let lan_subnets = |d: &Device| -> Vec<Ipv4Net> {
        d.assigned(InterfaceType::Lan).filter_map(Interface::subnet).collect()
    };

    let ours = lan_subnets(candidate);
    for other in others.iter().filter(|o| o.id != candidate.id) {
        for theirs in lan_subnets(other) {
            if let Some(mine) = ours.iter().find(|mine| subnets_overlap(mine, &theirs)) {
                return Err(Rejection::invalid(format!(
                    "LAN subnet {mine} overlaps {theirs} on device {}",
                    other.label()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::test_support::{interface, lan_wan_device};

    fn lan(id: &str, dev_id: &str, ip: [u8; 4], mask: u8) -> Interface {
        interface(id, dev_id, Some(InterfaceType::Lan), Some((Ipv4Addr::from(ip), mask)), None)
    }

    #[test]
    fn fixture_device_is_valid() {
        validate_device(&lan_wan_device("d", "m"), true).unwrap();
    }

    #[test]
    fn overlapping_lans_are_rejected() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[2] = lan("lan1", "eth2", [10, 0, 0, 129], 25);
        let err = validate_device(&device, false).unwrap_err();
        assert!(err.reason().contains("overlap"), "{err}");
    }

    #[test]
    fn disjoint_lans_are_accepted() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[2] = lan("lan1", "eth2", [10, 0, 1, 1], 24);
        validate_device(&device, false).unwrap();
    }

    #[test]
    fn wan_lan_overlap_is_rejected() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[1] = lan("lan0", "eth1", [192, 168, 1, 20], 24);
        assert!(validate_device(&device, false).is_err());
    }

    #[test]
    fn lan_with_gateway_is_rejected() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[1].gateway = Some(Ipv4Addr::new(10, 0, 0, 254));
        let err = validate_device(&device, false).unwrap_err();
        assert_eq!(err.reason(), "LAN interface eth1 must not have a gateway");
    }

    #[test]
    fn lan_with_path_labels_is_rejected() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[1].path_labels.push("gold".into());
        assert!(validate_device(&device, false).is_err());
    }

    #[test]
    fn wan_rules() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[0].routing = RoutingProtocol::Ospf;
        assert!(validate_device(&device, false).is_err());

        let mut device = lan_wan_device("d", "m");
        device.interfaces[0].gateway = None;
        assert!(validate_device(&device, false).is_err());
    }

    #[test]
    fn assigned_without_type_is_rejected() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[2].is_assigned = true;
        assert!(validate_device(&device, false).is_err());
    }

    #[test]
    fn runnable_needs_wan_and_lan() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[1].is_assigned = false;
        validate_device(&device, false).unwrap();
        let err = validate_device(&device, true).unwrap_err();
        assert!(err.reason().contains("LAN"));
    }

    #[test]
    fn duplicate_ports_are_rejected() {
        let mut device = lan_wan_device("d", "m");
        device.interfaces[2].dev_id = "eth1".into();
        assert!(validate_device(&device, false).is_err());
    }

    #[test]
    fn org_overlap_checks_other_devices_only() {
        let candidate = lan_wan_device("a", "m-a");
        let same_lan = Arc::new(lan_wan_device("b", "m-b"));
        assert!(validate_org_lan_overlap(&candidate, &[Arc::clone(&same_lan)]).is_err());

        let itself = Arc::new(candidate.clone());
        validate_org_lan_overlap(&candidate, &[itself]).unwrap();

        let mut other = lan_wan_device("c", "m-c");
        other.interfaces[1] = lan("lan0", "eth1", [10, 9, 0, 1], 24);
        validate_org_lan_overlap(&candidate, &[Arc::new(other)]).unwrap();
    }
}
