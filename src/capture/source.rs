//! Live packet source backed by pnet's datalink layer (AF_PACKET on Linux)

use std::io::ErrorKind;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver};
use tracing::{debug, info, warn};

use super::interface::NetworkInterface;
use super::{CaptureError, CaptureStats, PacketSource, SharedCaptureStats, SourcePoll};
use crate::decode;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_BUFFER_SIZE: usize = 65536;

/// Packet source reading from a live interface.
///
/// Reads block for at most [`READ_TIMEOUT`], so the owning thread sees
/// an [`SourcePoll::Idle`] at least ten times per second even on a
/// silent wire.
pub struct PnetSource {
    interface: String,
    rx: Box<dyn DataLinkReceiver>,
    stats: SharedCaptureStats,
}

impl PnetSource {
    /// Open a capture on the named interface.
    ///
    /// Fails with [`CaptureError::InterfaceUnavailable`] when the
    /// interface does not exist and [`CaptureError::PermissionDenied`]
    /// when the process lacks raw-socket capability.
    pub fn open(interface_name: &str, filter: Option<&str>) -> Result<Self, CaptureError> {
        let interface = NetworkInterface::by_name(interface_name)?;
        interface.validate_for_capture()?;

        if let Some(expr) = filter {
            // The AF_PACKET backend has no in-kernel filter hook; the
            // expression is accepted for interface parity and ignored.
            warn!("Capture filter '{}' not supported by this backend, ignoring", expr);
        }

        let config = Config {
            read_timeout: Some(READ_TIMEOUT),
            write_buffer_size: 0, // We don't write
            read_buffer_size: READ_BUFFER_SIZE,
            promiscuous: true,
            ..Default::default()
        };

        let pnet_interface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == interface_name)
            .ok_or_else(|| CaptureError::InterfaceUnavailable(interface_name.to_string()))?;

        let rx = match datalink::channel(&pnet_interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => return Err(CaptureError::UnsupportedChannel(interface_name.to_string())),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(CaptureError::PermissionDenied(interface_name.to_string()))
            }
            Err(e) => return Err(CaptureError::Io(e)),
        };

        info!("Started capture on interface '{}'", interface_name);

        Ok(Self {
            interface: interface_name.to_string(),
            rx,
            stats: SharedCaptureStats::new(CaptureStats::new()),
        })
    }

    /// Get the interface name
    pub fn interface_name(&self) -> &str {
        &self.interface
    }
}

impl PacketSource for PnetSource {
    fn stats(&self) -> Option<super::CaptureStatsSnapshot> {
        Some(self.stats.snapshot())
    }

    fn poll(&mut self) -> Result<SourcePoll, CaptureError> {
        match self.rx.next() {
            Ok(frame) => {
                self.stats.packets_captured.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_captured
                    .fetch_add(frame.len() as u64, Ordering::Relaxed);

                match decode::parse_packet(frame, Utc::now()) {
                    Ok(Some(record)) => Ok(SourcePoll::Packet(record)),
                    Ok(None) => {
                        self.stats.non_ipv4_dropped.fetch_add(1, Ordering::Relaxed);
                        Ok(SourcePoll::Idle)
                    }
                    Err(e) => {
                        self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                        debug!("Failed to parse frame: {}", e);
                        Ok(SourcePoll::Idle)
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(SourcePoll::Idle)
            }
            Err(e) => Err(CaptureError::Io(e)),
        }
    }
}
