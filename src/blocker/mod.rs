//! Active blocking with bounded lifetime
//!
//! Owns the set of currently blocked source addresses and keeps it
//! reconciled with the kernel firewall through a [`FirewallAdmin`].
//! Every in-memory entry corresponds to a live kernel rule identified
//! by the handle captured when the rule was installed.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::firewall::{FirewallAdmin, FirewallError, RuleHandle};

/// Addresses the engine must never hand to the kernel: the RFC 1918
/// ranges and the unspecified address.
fn is_reserved(addr: Ipv4Addr) -> bool {
    match addr.octets() {
        [10, ..] => true,
        [172, b, ..] if (16..=31).contains(&b) => true,
        [192, 168, ..] => true,
        _ => addr.is_unspecified(),
    }
}

/// One blocked address.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub addr: Ipv4Addr,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub handle: RuleHandle,
}

/// Result of a block request.
#[derive(Debug)]
pub enum BlockOutcome {
    /// New kernel rule installed
    Blocked,
    /// Entry refreshed; the existing kernel rule stands
    AlreadyBlocked,
    /// Address is private/unspecified; no kernel call was made
    Rejected,
    /// The firewall refused
    Failed(FirewallError),
}

/// Result of an explicit unblock.
#[derive(Debug)]
pub enum UnblockOutcome {
    Unblocked,
    NotBlocked,
    Failed(FirewallError),
}

/// Address block-list with TTL and kernel reconciliation.
///
/// All internal state sits behind one mutex; firewall calls are made
/// while it is held. Block rates are low and kernel latency bounded,
/// so the serialization is not a throughput concern.
pub struct Blocker {
    admin: Arc<dyn FirewallAdmin>,
    entries: Mutex<HashMap<Ipv4Addr, BlockEntry>>,
    /// Set after a permanent firewall failure; no further kernel calls
    /// are attempted until restart.
    disabled: AtomicBool,
}

impl Blocker {
    pub fn new(admin: Arc<dyn FirewallAdmin>) -> Self {
        Self {
            admin,
            entries: Mutex::new(HashMap::new()),
            disabled: AtomicBool::new(false),
        }
    }

    /// Prepare the kernel chain and recover rules that survived a
    /// restart. Returns the number of recovered entries.
    pub fn init(&self, ttl: Duration, now: DateTime<Utc>) -> Result<usize, FirewallError> {
        self.admin.ensure_chain()?;

        let recovered = self.admin.existing_drops()?;
        let count = recovered.len();

        let mut entries = self.entries.lock();
        for (addr, handle) in recovered {
            debug!("Recovered kernel drop rule for {} (handle {})", addr, handle);
            entries.insert(
                addr,
                BlockEntry {
                    addr,
                    reason: "recovered at startup".to_string(),
                    created_at: now,
                    expires_at: now + ttl,
                    handle,
                },
            );
        }

        if count > 0 {
            info!("Recovered {} blocked address(es) from kernel chain", count);
        }
        Ok(count)
    }

    /// Whether blocking was disabled by a permanent firewall failure.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Block a source address for `ttl`.
    ///
    /// Re-blocking refreshes the entry's lifetime without touching the
    /// kernel. Private-range and unspecified addresses are rejected
    /// before any kernel call.
    pub fn block(
        &self,
        addr: Ipv4Addr,
        reason: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> BlockOutcome {
        if is_reserved(addr) {
            warn!("Refusing to block reserved address {}", addr);
            return BlockOutcome::Rejected;
        }

        if self.is_disabled() {
            return BlockOutcome::Failed(FirewallError::Permanent(
                "blocking disabled after permanent firewall failure".to_string(),
            ));
        }

        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&addr) {
            entry.created_at = now;
            entry.expires_at = now + ttl;
            entry.reason = reason.to_string();
            debug!("Refreshed block for {} until {}", addr, entry.expires_at);
            return BlockOutcome::AlreadyBlocked;
        }

        match self.add_drop_with_retry(addr) {
            Ok(handle) => {
                info!("Blocked {} until {} ({})", addr, now + ttl, reason);
                entries.insert(
                    addr,
                    BlockEntry {
                        addr,
                        reason: reason.to_string(),
                        created_at: now,
                        expires_at: now + ttl,
                        handle,
                    },
                );
                BlockOutcome::Blocked
            }
            Err(e) => {
                error!("Failed to block {}: {}", addr, e);
                if e.is_permanent() {
                    self.disabled.store(true, Ordering::SeqCst);
                }
                BlockOutcome::Failed(e)
            }
        }
    }

    /// Remove the block for an address, if any.
    pub fn unblock(&self, addr: Ipv4Addr) -> UnblockOutcome {
        let mut entries = self.entries.lock();

        let entry = match entries.get(&addr) {
            Some(e) => e,
            None => return UnblockOutcome::NotBlocked,
        };

        match self.admin.remove(&entry.handle) {
            Ok(()) => {
                entries.remove(&addr);
                info!("Unblocked {}", addr);
                UnblockOutcome::Unblocked
            }
            Err(e) => {
                error!("Failed to unblock {}: {}", addr, e);
                if e.is_permanent() {
                    self.disabled.store(true, Ordering::SeqCst);
                }
                UnblockOutcome::Failed(e)
            }
        }
    }

    /// Remove every expired entry and return the addresses that were
    /// unblocked. Idempotent; entries whose kernel removal fails stay
    /// in place and are retried on the next sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Ipv4Addr> {
        let mut entries = self.entries.lock();

        let expired: Vec<Ipv4Addr> = entries
            .values()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.addr)
            .collect();

        let mut unblocked = Vec::new();
        for addr in expired {
            let handle = entries[&addr].handle.clone();
            match self.admin.remove(&handle) {
                Ok(()) => {
                    entries.remove(&addr);
                    info!("Block expired for {}", addr);
                    unblocked.push(addr);
                }
                Err(e) => {
                    warn!("Failed to remove expired rule for {}: {}", addr, e);
                    if e.is_permanent() {
                        self.disabled.store(true, Ordering::SeqCst);
                    }
                }
            }
        }

        unblocked
    }

    /// Copy of the current block-list for introspection.
    pub fn snapshot(&self) -> Vec<BlockEntry> {
        let mut entries: Vec<BlockEntry> = self.entries.lock().values().cloned().collect();
        entries.sort_by_key(|e| e.expires_at);
        entries
    }

    /// One re-ensure-and-retry on a transient failure; the chain may
    /// have been removed behind our back.
    fn add_drop_with_retry(&self, addr: Ipv4Addr) -> Result<RuleHandle, FirewallError> {
        match self.admin.add_drop(addr) {
            Ok(handle) => Ok(handle),
            Err(e) if !e.is_permanent() => {
                warn!("add_drop for {} failed ({}), re-ensuring chain", addr, e);
                self.admin.ensure_chain()?;
                self.admin.add_drop(addr)
            }
            Err(e) => Err(e),
        }
    }
}
