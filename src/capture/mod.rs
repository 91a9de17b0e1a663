//! Capture module - packet acquisition from a live interface

pub mod interface;
pub mod source;

pub use interface::{print_interfaces, NetworkInterface};
pub use source::PnetSource;

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A single parsed IPv4 packet.
///
/// Non-IPv4 traffic never reaches this type; the source drops it and
/// counts the drop. Ports are 0 for protocols that do not carry them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketRecord {
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Source IP address
    pub src_addr: Ipv4Addr,
    /// Destination IP address
    pub dst_addr: Ipv4Addr,
    /// IP protocol number (6 = TCP, 17 = UDP, 1 = ICMP, etc.)
    pub proto: u8,
    /// Source port, 0 if the protocol has none
    pub src_port: u16,
    /// Destination port, 0 if the protocol has none
    pub dst_port: u16,
    /// Total frame length in bytes
    pub length: u32,
}

/// Result of one poll of a packet source.
#[derive(Debug)]
pub enum SourcePoll {
    /// A parsed IPv4 packet
    Packet(PacketRecord),
    /// Read timed out with no packet; the caller may run housekeeping
    Idle,
    /// The source is exhausted and will yield no further packets
    EndOfStream,
}

/// Errors raised while opening or reading a packet source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("interface '{0}' not found")]
    InterfaceUnavailable(String),

    #[error("permission denied opening capture on '{0}' (root or CAP_NET_RAW required)")]
    PermissionDenied(String),

    #[error("unsupported datalink channel type on '{0}'")]
    UnsupportedChannel(String),

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A lazy, non-restartable sequence of packets.
///
/// `poll` blocks for at most the source's internal read timeout, so a
/// single-threaded caller can interleave housekeeping between reads.
pub trait PacketSource: Send {
    fn poll(&mut self) -> Result<SourcePoll, CaptureError>;

    /// Capture-side statistics, if the source tracks them.
    fn stats(&self) -> Option<CaptureStatsSnapshot> {
        None
    }
}

/// Capture statistics
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// Total packets seen on the wire
    pub packets_captured: AtomicU64,
    /// Total bytes seen on the wire
    pub bytes_captured: AtomicU64,
    /// Frames that failed to parse
    pub parse_errors: AtomicU64,
    /// Well-formed frames that were not IPv4
    pub non_ipv4_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            packets_captured: self.packets_captured.load(Ordering::Relaxed),
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            non_ipv4_dropped: self.non_ipv4_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of capture statistics (non-atomic copy)
#[derive(Debug, Clone)]
pub struct CaptureStatsSnapshot {
    pub packets_captured: u64,
    pub bytes_captured: u64,
    pub parse_errors: u64,
    pub non_ipv4_dropped: u64,
}

/// Shared handle to a source's statistics.
pub type SharedCaptureStats = Arc<CaptureStats>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_stats_snapshot() {
        let stats = CaptureStats::new();
        stats.packets_captured.fetch_add(42, Ordering::Relaxed);
        stats.bytes_captured.fetch_add(2048, Ordering::Relaxed);
        stats.non_ipv4_dropped.fetch_add(3, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.packets_captured, 42);
        assert_eq!(snap.bytes_captured, 2048);
        assert_eq!(snap.parse_errors, 0);
        assert_eq!(snap.non_ipv4_dropped, 3);
    }
}
