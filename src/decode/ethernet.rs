//! Ethernet frame parsing

use super::DecodeError;

// EtherType constants
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_VLAN: u16 = 0x8100; // 802.1Q
pub const ETHERTYPE_QINQ: u16 = 0x88A8; // 802.1ad (QinQ outer)
pub const ETHERTYPE_QINQ_ALT: u16 = 0x9100; // Alternative QinQ tag

/// Minimum Ethernet frame size (without preamble/FCS)
pub const MIN_FRAME_SIZE: usize = 14;

/// Parse the Ethernet header, skipping over any VLAN tags.
///
/// Returns the inner ethertype and the offset of the layer-3 payload.
pub fn parse_ethernet(data: &[u8]) -> Result<(u16, usize), DecodeError> {
    if data.len() < MIN_FRAME_SIZE {
        return Err(DecodeError::Truncated {
            got: data.len(),
            need: MIN_FRAME_SIZE,
        });
    }

    let mut ethertype = u16::from_be_bytes([data[12], data[13]]);
    let mut offset = MIN_FRAME_SIZE;

    // Each 802.1Q/802.1ad tag is 4 bytes: 2 bytes TCI + 2 bytes inner
    // ethertype. Up to two tags (QinQ) are unwrapped.
    for _ in 0..2 {
        match ethertype {
            ETHERTYPE_VLAN | ETHERTYPE_QINQ | ETHERTYPE_QINQ_ALT => {
                if data.len() < offset + 4 {
                    return Err(DecodeError::Truncated {
                        got: data.len(),
                        need: offset + 4,
                    });
                }
                ethertype = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
                offset += 4;
            }
            _ => break,
        }
    }

    Ok((ethertype, offset))
}
