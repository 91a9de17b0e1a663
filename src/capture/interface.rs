//! Network interface lookup and validation

use std::net::IpAddr;

use pnet::datalink::{self, NetworkInterface as PnetInterface};
use tracing::{info, warn};

use super::CaptureError;

/// Represents a network interface
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    /// Interface name (e.g., "eth0")
    pub name: String,

    /// Interface index
    pub index: u32,

    /// MAC address (if available)
    pub mac: Option<[u8; 6]>,

    /// IP addresses assigned to this interface
    pub ips: Vec<IpAddr>,

    /// Whether the interface is up
    pub is_up: bool,

    /// Whether the interface is a loopback
    pub is_loopback: bool,
}

impl NetworkInterface {
    /// Get a network interface by name
    pub fn by_name(name: &str) -> Result<Self, CaptureError> {
        let iface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| CaptureError::InterfaceUnavailable(name.to_string()))?;

        Ok(Self::from_pnet(iface))
    }

    /// Get all available network interfaces
    pub fn list_all() -> Vec<Self> {
        datalink::interfaces()
            .into_iter()
            .map(Self::from_pnet)
            .collect()
    }

    fn from_pnet(iface: PnetInterface) -> Self {
        let mac = iface.mac.map(|m| m.octets());
        let ips: Vec<IpAddr> = iface.ips.iter().map(|ip| ip.ip()).collect();
        let is_up = iface.is_up();
        let is_loopback = iface.is_loopback();
        let index = iface.index;

        Self {
            name: iface.name,
            index,
            mac,
            ips,
            is_up,
            is_loopback,
        }
    }

    /// Check that the interface can carry a capture
    pub fn validate_for_capture(&self) -> Result<(), CaptureError> {
        if !self.is_up {
            return Err(CaptureError::InterfaceUnavailable(format!(
                "{} (interface is down)",
                self.name
            )));
        }

        if self.is_loopback {
            warn!("Interface '{}' is a loopback interface", self.name);
        }

        info!(
            "Interface '{}' validated: MAC={}, IPs={:?}",
            self.name,
            self.mac
                .map(|m| format!(
                    "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    m[0], m[1], m[2], m[3], m[4], m[5]
                ))
                .unwrap_or_else(|| "unknown".to_string()),
            self.ips
        );

        Ok(())
    }
}

/// Print information about all interfaces
pub fn print_interfaces() {
    println!("Available network interfaces:");
    println!("{:-<60}", "");

    for iface in NetworkInterface::list_all() {
        let mac_str = iface
            .mac
            .map(|m| {
                format!(
                    "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    m[0], m[1], m[2], m[3], m[4], m[5]
                )
            })
            .unwrap_or_else(|| "N/A".to_string());

        let status = if iface.is_up { "UP" } else { "DOWN" };
        let loopback = if iface.is_loopback { " (loopback)" } else { "" };

        println!("{}: {} [{}{}]", iface.name, mac_str, status, loopback);

        for ip in &iface.ips {
            println!("    {}", ip);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_interfaces() {
        let interfaces = NetworkInterface::list_all();
        assert!(!interfaces.is_empty(), "Should have at least one interface");
    }

    #[test]
    fn test_unknown_interface() {
        let result = NetworkInterface::by_name("definitely-not-a-real-iface0");
        assert!(matches!(result, Err(CaptureError::InterfaceUnavailable(_))));
    }
}
