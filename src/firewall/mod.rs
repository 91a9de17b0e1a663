//! Kernel firewall administration
//!
//! The engine never speaks a firewall dialect itself; it drives a
//! [`FirewallAdmin`] and stores the opaque rule handles it gets back.

pub mod nftables;

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

pub use nftables::NftablesAdmin;

/// Opaque identifier of one installed kernel rule. The engine never
/// interprets it; it only hands it back on removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleHandle(String);

impl RuleHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Firewall call failures, split by whether a retry can help.
#[derive(Debug, Clone, Error)]
pub enum FirewallError {
    /// Worth retrying: busy kernel, missing chain that can be
    /// recreated, garbled tool output.
    #[error("firewall operation failed (transient): {0}")]
    Transient(String),

    /// Give up and surface: no permission, no tooling, no netlink.
    #[error("firewall unavailable (permanent): {0}")]
    Permanent(String),
}

impl FirewallError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, FirewallError::Permanent(_))
    }
}

/// Everything the engine needs from the host firewall.
pub trait FirewallAdmin: Send + Sync {
    /// Create the engine's table/chain if missing. Called at startup.
    fn ensure_chain(&self) -> Result<(), FirewallError>;

    /// Install a drop rule for the source address; returns its handle.
    fn add_drop(&self, addr: Ipv4Addr) -> Result<RuleHandle, FirewallError>;

    /// Remove the rule identified by a handle from [`Self::add_drop`].
    fn remove(&self, handle: &RuleHandle) -> Result<(), FirewallError>;

    /// Drop rules already present in the engine's chain, for state
    /// recovery after restart. Backends that cannot enumerate return
    /// an empty list.
    fn existing_drops(&self) -> Result<Vec<(Ipv4Addr, RuleHandle)>, FirewallError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_opaque_string() {
        let handle = RuleHandle::new("42");
        assert_eq!(handle.as_str(), "42");
        assert_eq!(handle.to_string(), "42");
        assert_eq!(handle, RuleHandle::new("42".to_string()));
    }

    #[test]
    fn test_error_classification() {
        assert!(!FirewallError::Transient("busy".into()).is_permanent());
        assert!(FirewallError::Permanent("no nft".into()).is_permanent());
    }
}
