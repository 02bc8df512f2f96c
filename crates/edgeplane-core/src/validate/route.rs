use super::Rejection;
use crate::model::{Device, ItemStatus, StaticRoute};

/// Check a static route against the device it targets.
pub fn validate_static_route(device: &Device, route: &StaticRoute) -> Result<(), Rejection> {
    let network = route.destination.trunc();
    if network != route.destination {
        return Err(Rejection::invalid(format!(
            "destination {} has host bits set, use {network}",
            route.destination
        )));
    }

    let gw = route.gateway;
    if gw.is_unspecified() || gw.is_broadcast() || gw.is_multicast() {
        return Err(Rejection::invalid(format!("{gw} is not a usable gateway")));
    }

    if let Some(dev_id) = &route.interface {
        match device.interface(dev_id) {
            None => {
                return Err(Rejection::invalid(format!(
                    "interface {dev_id} does not exist on {}",
                    device.label()
                )));
            }
            Some(iface) if !iface.is_assigned => {
                return Err(Rejection::invalid(format!(
                    "interface {} is not assigned",
                    iface.name
                )));
            }
            Some(_) => {}
        }
    }

    let duplicate = device.static_routes.iter().any(|existing| {
        existing.id != route.id
            && !matches!(existing.status, ItemStatus::AddFailed | ItemStatus::JobDeleted)
            && existing.destination == route.destination
            && existing.gateway == route.gateway
    });
    if duplicate {
        return Err(Rejection::conflict(format!(
            "a route to {} via {gw} already exists",
            route.destination
        )));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::test_support::{lan_wan_device, static_route};

    #[test]
    fn accepts_plain_route() {
        let device = lan_wan_device("d", "m");
        validate_static_route(&device, &static_route("r", ItemStatus::AddWait)).unwrap();
    }

    #[test]
    fn rejects_host_bits_and_bad_gateway() {
        let device = lan_wan_device("d", "m");
        let mut route = static_route("r", ItemStatus::AddWait);
        route.destination = "172.16.5.0/16".parse().unwrap();
        let err = validate_static_route(&device, &route).unwrap_err();
        assert!(err.reason().contains("172.16.0.0/16"));

        let mut route = static_route("r", ItemStatus::AddWait);
        route.gateway = Ipv4Addr::UNSPECIFIED;
        assert!(validate_static_route(&device, &route).is_err());
    }

    #[test]
    fn pinned_interface_must_be_assigned() {
        let device = lan_wan_device("d", "m");
        let mut route = static_route("r", ItemStatus::AddWait);
        route.interface = Some("eth2".into());
        assert!(validate_static_route(&device, &route).is_err());
        route.interface = Some("eth0".into());
        validate_static_route(&device, &route).unwrap();
    }

    #[test]
    fn duplicate_is_a_conflict_unless_previous_failed() {
        let mut device = lan_wan_device("d", "m");
        device.static_routes.push(static_route("old", ItemStatus::Complete));
        let err = validate_static_route(&device, &static_route("new", ItemStatus::AddWait)).unwrap_err();
        assert!(matches!(err, Rejection::Conflict { .. }));

        device.static_routes[0].status = ItemStatus::AddFailed;
        validate_static_route(&device, &static_route("new", ItemStatus::AddWait)).unwrap();
    }
}
