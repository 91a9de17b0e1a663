//! Engine-wide counters
//!
//! All counters are atomics mutated from whichever thread observed the
//! fact; reads go through an immutable snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Pipeline statistics
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Flows handed to the worker queue
    pub flows_emitted: AtomicU64,
    /// Flows shed by the drop-oldest policy
    pub dropped_flows: AtomicU64,
    /// Flows that reached the scorer
    pub flows_scored: AtomicU64,
    /// Flows scored below the threshold
    pub anomalies_detected: AtomicU64,
    /// Per-flow scoring failures (failed open)
    pub scoring_errors: AtomicU64,
    /// New kernel drop rules installed
    pub blocks_installed: AtomicU64,
    /// Block requests refused by the private-range guard
    pub blocks_rejected: AtomicU64,
    /// Block requests the firewall failed
    pub block_failures: AtomicU64,
    /// Addresses unblocked by expiry sweeps
    pub blocks_expired: AtomicU64,
    /// Blocking disabled after a permanent firewall failure
    pub degraded: AtomicBool,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            flows_emitted: self.flows_emitted.load(Ordering::Relaxed),
            dropped_flows: self.dropped_flows.load(Ordering::Relaxed),
            flows_scored: self.flows_scored.load(Ordering::Relaxed),
            anomalies_detected: self.anomalies_detected.load(Ordering::Relaxed),
            scoring_errors: self.scoring_errors.load(Ordering::Relaxed),
            blocks_installed: self.blocks_installed.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            block_failures: self.block_failures.load(Ordering::Relaxed),
            blocks_expired: self.blocks_expired.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine statistics (non-atomic copy)
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatsSnapshot {
    pub flows_emitted: u64,
    pub dropped_flows: u64,
    pub flows_scored: u64,
    pub anomalies_detected: u64,
    pub scoring_errors: u64,
    pub blocks_installed: u64,
    pub blocks_rejected: u64,
    pub block_failures: u64,
    pub blocks_expired: u64,
    pub degraded: bool,
}
