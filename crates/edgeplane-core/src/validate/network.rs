use ipnet::Ipv4Net;

/// Whether two IPv4 networks share any address.
///
/// CIDR blocks either nest or are disjoint, so overlap means one
/// contains the other's network address.
pub fn subnets_overlap(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn nested_blocks_overlap() {
        assert!(subnets_overlap(&net("10.0.0.0/24"), &net("10.0.0.128/25")));
        assert!(subnets_overlap(&net("10.0.0.128/25"), &net("10.0.0.0/24")));
        assert!(subnets_overlap(&net("10.0.0.0/8"), &net("10.200.3.0/24")));
    }

    #[test]
    fn adjacent_blocks_do_not_overlap() {
        assert!(!subnets_overlap(&net("10.0.0.0/24"), &net("10.0.1.0/24")));
        assert!(!subnets_overlap(&net("10.0.0.0/25"), &net("10.0.0.128/25")));
    }
}
