//! Per-flow mutable state

use std::net::Ipv4Addr;

use chrono::{DateTime, Duration, Utc};

use super::FlowKey;
use crate::capture::PacketRecord;

/// Accumulated state of one in-flight flow.
///
/// The forward direction is fixed by the first packet seen; subsequent
/// packets count as forward or backward depending on whether their
/// source matches the forward endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    pub key: FlowKey,
    /// Endpoint that sent the first packet of the flow
    pub forward_addr: Ipv4Addr,
    pub forward_port: u16,
    pub start_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub fwd_packets: u64,
    pub bwd_packets: u64,
    pub fwd_bytes: u64,
    pub bwd_bytes: u64,
}

impl FlowState {
    /// Start a new flow from its first packet.
    pub fn new(key: FlowKey, pkt: &PacketRecord) -> Self {
        let mut state = Self {
            key,
            forward_addr: pkt.src_addr,
            forward_port: pkt.src_port,
            start_time: pkt.timestamp,
            last_seen: pkt.timestamp,
            fwd_packets: 0,
            bwd_packets: 0,
            fwd_bytes: 0,
            bwd_bytes: 0,
        };
        state.apply(pkt);
        state
    }

    /// Fold one packet into the flow's counters.
    pub fn apply(&mut self, pkt: &PacketRecord) {
        if (pkt.src_addr, pkt.src_port) == (self.forward_addr, self.forward_port) {
            self.fwd_packets += 1;
            self.fwd_bytes += pkt.length as u64;
        } else {
            self.bwd_packets += 1;
            self.bwd_bytes += pkt.length as u64;
        }

        if pkt.timestamp > self.last_seen {
            self.last_seen = pkt.timestamp;
        }
    }

    /// The IP protocol number of the flow.
    pub fn proto(&self) -> u8 {
        self.key.proto
    }

    /// Endpoint opposite the forward endpoint.
    pub fn backward_endpoint(&self) -> (Ipv4Addr, u16) {
        if (self.key.addr_a, self.key.port_a) == (self.forward_addr, self.forward_port) {
            (self.key.addr_b, self.key.port_b)
        } else {
            (self.key.addr_a, self.key.port_a)
        }
    }

    /// Lifetime of the flow so far.
    pub fn duration(&self) -> Duration {
        self.last_seen - self.start_time
    }

    pub fn total_packets(&self) -> u64 {
        self.fwd_packets + self.bwd_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.fwd_bytes + self.bwd_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(
        src: Ipv4Addr,
        sport: u16,
        dst: Ipv4Addr,
        dport: u16,
        len: u32,
        ts: DateTime<Utc>,
    ) -> PacketRecord {
        PacketRecord {
            timestamp: ts,
            src_addr: src,
            dst_addr: dst,
            proto: 6,
            src_port: sport,
            dst_port: dport,
            length: len,
        }
    }

    #[test]
    fn test_direction_accounting() {
        let a = Ipv4Addr::new(192, 0, 2, 1);
        let b = Ipv4Addr::new(198, 51, 100, 9);
        let t0 = Utc::now();

        let first = pkt(a, 54321, b, 443, 100, t0);
        let key = FlowKey::canonical(&first);
        let mut flow = FlowState::new(key, &first);

        flow.apply(&pkt(b, 443, a, 54321, 200, t0 + Duration::milliseconds(100)));
        flow.apply(&pkt(a, 54321, b, 443, 100, t0 + Duration::milliseconds(200)));

        assert_eq!(flow.fwd_packets, 2);
        assert_eq!(flow.bwd_packets, 1);
        assert_eq!(flow.fwd_bytes, 200);
        assert_eq!(flow.bwd_bytes, 200);
        assert_eq!(flow.forward_addr, a);
        assert_eq!(flow.backward_endpoint(), (b, 443));
        assert_eq!(flow.duration(), Duration::milliseconds(200));
    }

    #[test]
    fn test_last_seen_never_rewinds() {
        let a = Ipv4Addr::new(192, 0, 2, 1);
        let b = Ipv4Addr::new(198, 51, 100, 9);
        let t0 = Utc::now();

        let first = pkt(a, 1000, b, 2000, 64, t0);
        let mut flow = FlowState::new(FlowKey::canonical(&first), &first);

        // Out-of-order timestamp must not move last_seen backwards
        flow.apply(&pkt(b, 2000, a, 1000, 64, t0 - Duration::seconds(1)));

        assert_eq!(flow.last_seen, t0);
        assert!(flow.last_seen >= flow.start_time);
    }

    #[test]
    fn test_invariants_after_first_packet() {
        let a = Ipv4Addr::new(192, 0, 2, 1);
        let b = Ipv4Addr::new(198, 51, 100, 9);
        let first = pkt(a, 1000, b, 2000, 64, Utc::now());
        let flow = FlowState::new(FlowKey::canonical(&first), &first);

        assert!(flow.total_packets() >= 1);
        assert!(flow.total_bytes() >= flow.total_packets());
    }
}
