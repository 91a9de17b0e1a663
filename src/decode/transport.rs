//! Transport layer (TCP/UDP) port parsing

use super::ipv4::protocol;
use super::DecodeError;

/// Extract source and destination ports for the given IP protocol.
///
/// TCP and UDP both carry the port pair in their first four bytes.
/// Every other protocol yields `(0, 0)`, which keys ICMP and friends
/// as port-less flows.
pub fn parse_ports(ip_protocol: u8, data: &[u8]) -> Result<(u16, u16), DecodeError> {
    match ip_protocol {
        protocol::TCP | protocol::UDP => {
            if data.len() < 4 {
                return Err(DecodeError::TruncatedTransport {
                    proto: ip_protocol,
                    got: data.len(),
                });
            }

            let src_port = u16::from_be_bytes([data[0], data[1]]);
            let dst_port = u16::from_be_bytes([data[2], data[3]]);
            Ok((src_port, dst_port))
        }
        _ => Ok((0, 0)),
    }
}
