//! Frame decoding module
//!
//! Parses raw Ethernet frames (including 802.1Q/802.1ad tags) down to
//! the IPv4 + transport fields needed to key a flow. Everything that is
//! not IPv4 decodes to `None`; malformed frames decode to an error.

pub mod ethernet;
pub mod ipv4;
pub mod transport;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::capture::PacketRecord;

pub use ipv4::protocol_name;

/// Frame parsing failures. These are counted and dropped, never fatal.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame too short: {got} bytes (minimum {need})")]
    Truncated { got: usize, need: usize },

    #[error("invalid IP version: {0} (expected 4)")]
    BadIpVersion(u8),

    #[error("invalid IPv4 header length: {0}")]
    BadIpHeader(usize),

    #[error("transport header truncated for protocol {proto}: {got} bytes")]
    TruncatedTransport { proto: u8, got: usize },
}

/// Parse a complete frame into a [`PacketRecord`].
///
/// Returns `Ok(None)` for well-formed frames that are not IPv4.
pub fn parse_packet(
    data: &[u8],
    timestamp: DateTime<Utc>,
) -> Result<Option<PacketRecord>, DecodeError> {
    let frame_len = data.len() as u32;

    let (ethertype, l3_offset) = ethernet::parse_ethernet(data)?;
    if ethertype != ethernet::ETHERTYPE_IPV4 {
        return Ok(None);
    }

    let ip = ipv4::parse_ipv4(&data[l3_offset..])?;

    let (src_port, dst_port) =
        transport::parse_ports(ip.protocol, &data[l3_offset + ip.header_length..])?;

    Ok(Some(PacketRecord {
        timestamp,
        src_addr: ip.src_ip,
        dst_addr: ip.dst_ip,
        proto: ip.protocol,
        src_port,
        dst_port,
        length: frame_len,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn tcp_frame() -> Vec<u8> {
        let mut data = vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst MAC
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src MAC
            0x08, 0x00, // EtherType (IPv4)
            // IPv4 header
            0x45, 0x00, 0x00, 0x28, // Version+IHL, ToS, total length
            0x00, 0x01, 0x40, 0x00, // ID, flags+fragment
            0x40, 0x06, 0x00, 0x00, // TTL, protocol (TCP), checksum
            0xc0, 0x00, 0x02, 0x01, // src 192.0.2.1
            0xc6, 0x33, 0x64, 0x09, // dst 198.51.100.9
        ];
        // TCP header (ports only matter here)
        data.extend_from_slice(&[
            0xd4, 0x31, // src port 54321
            0x01, 0xbb, // dst port 443
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x50, 0x02, 0xff, 0xff, 0x00, 0x00,
            0x00, 0x00,
        ]);
        data
    }

    #[test]
    fn test_parse_tcp_packet() {
        let record = parse_packet(&tcp_frame(), Utc::now()).unwrap().unwrap();

        assert_eq!(record.src_addr, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(record.dst_addr, Ipv4Addr::new(198, 51, 100, 9));
        assert_eq!(record.proto, 6);
        assert_eq!(record.src_port, 54321);
        assert_eq!(record.dst_port, 443);
        assert_eq!(record.length, tcp_frame().len() as u32);
    }

    #[test]
    fn test_parse_udp_ports_are_distinct() {
        let mut data = vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x08, 0x00,
            0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0x00,
            0x02, 0x01, 0xc6, 0x33, 0x64, 0x09,
        ];
        data.extend_from_slice(&[
            0x00, 0x35, // src port 53
            0x30, 0x39, // dst port 12345
            0x00, 0x0c, 0x00, 0x00,
        ]);

        let record = parse_packet(&data, Utc::now()).unwrap().unwrap();
        assert_eq!(record.src_port, 53);
        assert_eq!(record.dst_port, 12345);
    }

    #[test]
    fn test_parse_icmp_has_zero_ports() {
        let data = vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x08, 0x00,
            0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x40, 0x00, 0x40, 0x01, 0x00, 0x00, 0xc0, 0x00,
            0x02, 0x01, 0xc6, 0x33, 0x64, 0x09, // ICMP payload
            0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01,
        ];

        let record = parse_packet(&data, Utc::now()).unwrap().unwrap();
        assert_eq!(record.proto, 1);
        assert_eq!(record.src_port, 0);
        assert_eq!(record.dst_port, 0);
    }

    #[test]
    fn test_non_ipv4_is_dropped() {
        // ARP frame
        let data = vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x08, 0x06,
            0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01,
        ];

        assert!(parse_packet(&data, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_vlan_tagged_ipv4() {
        let mut data = vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, //
            0x81, 0x00, // 802.1Q
            0x00, 0x64, // VLAN 100
            0x08, 0x00, // IPv4
            0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x40, 0x00, 0x40, 0x01, 0x00, 0x00, 0xc0, 0x00,
            0x02, 0x01, 0xc6, 0x33, 0x64, 0x09,
        ];
        data.extend_from_slice(&[0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01]);

        let record = parse_packet(&data, Utc::now()).unwrap().unwrap();
        assert_eq!(record.src_addr, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(record.proto, 1);
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let data = vec![0xff, 0xff, 0xff];
        assert!(parse_packet(&data, Utc::now()).is_err());
    }
}
