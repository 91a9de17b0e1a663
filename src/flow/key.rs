//! Canonical 5-tuple flow keys

use std::fmt;
use std::net::Ipv4Addr;

use crate::capture::PacketRecord;
use crate::decode::protocol_name;

/// Canonicalized 5-tuple identifying a bidirectional flow.
///
/// The endpoints are ordered so that `(addr_a, port_a)` compares less
/// than or equal to `(addr_b, port_b)`; both directions of a
/// conversation therefore map to the same key. Direction is recovered
/// from the owning [`super::FlowState`]'s forward endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    pub addr_a: Ipv4Addr,
    pub addr_b: Ipv4Addr,
    pub port_a: u16,
    pub port_b: u16,
    pub proto: u8,
}

impl FlowKey {
    /// Build the canonical key for a packet.
    pub fn canonical(pkt: &PacketRecord) -> Self {
        Self::from_endpoints(
            pkt.src_addr,
            pkt.src_port,
            pkt.dst_addr,
            pkt.dst_port,
            pkt.proto,
        )
    }

    /// Build the canonical key from raw endpoints.
    pub fn from_endpoints(
        src_addr: Ipv4Addr,
        src_port: u16,
        dst_addr: Ipv4Addr,
        dst_port: u16,
        proto: u8,
    ) -> Self {
        if (src_addr, src_port) <= (dst_addr, dst_port) {
            Self {
                addr_a: src_addr,
                addr_b: dst_addr,
                port_a: src_port,
                port_b: dst_port,
                proto,
            }
        } else {
            Self {
                addr_a: dst_addr,
                addr_b: src_addr,
                port_a: dst_port,
                port_b: src_port,
                proto,
            }
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{} [{}]",
            self.addr_a,
            self.port_a,
            self.addr_b,
            self.port_b,
            protocol_name(self.proto)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_directions_same_key() {
        let a = Ipv4Addr::new(192, 0, 2, 1);
        let b = Ipv4Addr::new(198, 51, 100, 9);

        let forward = FlowKey::from_endpoints(a, 54321, b, 443, 6);
        let backward = FlowKey::from_endpoints(b, 443, a, 54321, 6);

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_canonical_ordering_invariant() {
        let key = FlowKey::from_endpoints(
            Ipv4Addr::new(203, 0, 113, 7),
            80,
            Ipv4Addr::new(192, 0, 2, 1),
            50000,
            6,
        );

        assert!((key.addr_a, key.port_a) <= (key.addr_b, key.port_b));
    }

    #[test]
    fn test_same_addr_orders_by_port() {
        let a = Ipv4Addr::new(192, 0, 2, 1);

        let key = FlowKey::from_endpoints(a, 9000, a, 80, 17);
        assert_eq!(key.port_a, 80);
        assert_eq!(key.port_b, 9000);
    }

    #[test]
    fn test_proto_distinguishes_keys() {
        let a = Ipv4Addr::new(192, 0, 2, 1);
        let b = Ipv4Addr::new(198, 51, 100, 9);

        let tcp = FlowKey::from_endpoints(a, 0, b, 0, 6);
        let icmp = FlowKey::from_endpoints(a, 0, b, 0, 1);
        assert_ne!(tcp, icmp);
    }

    #[test]
    fn test_display() {
        let key = FlowKey::from_endpoints(
            Ipv4Addr::new(192, 0, 2, 1),
            54321,
            Ipv4Addr::new(198, 51, 100, 9),
            443,
            6,
        );
        let shown = key.to_string();
        assert!(shown.contains("192.0.2.1:54321"));
        assert!(shown.contains("TCP"));
    }
}
