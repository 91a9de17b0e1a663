//! Flow table with timeout-driven eviction
//!
//! Owns every in-flight [`FlowState`]. Expiry is tracked with two
//! ordered indexes (by last_seen and by start_time), so finding the
//! next flow to evict is O(log N) rather than a table scan.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{FlowKey, FlowState};
use crate::capture::PacketRecord;

/// In-memory table of live flows.
///
/// None of `ingest`/`tick`/`drain` can fail; malformed input never
/// reaches this layer.
pub struct FlowTable {
    flows: HashMap<FlowKey, FlowState>,
    /// Flows ordered by last activity; drives the inactive timeout and
    /// capacity eviction.
    idle_index: BTreeSet<(DateTime<Utc>, FlowKey)>,
    /// Flows ordered by creation; drives the active timeout.
    age_index: BTreeSet<(DateTime<Utc>, FlowKey)>,
    inactive_timeout: Duration,
    active_timeout: Duration,
    max_flows: usize,
}

impl FlowTable {
    pub fn new(inactive_timeout: Duration, active_timeout: Duration, max_flows: usize) -> Self {
        Self {
            flows: HashMap::new(),
            idle_index: BTreeSet::new(),
            age_index: BTreeSet::new(),
            inactive_timeout,
            active_timeout,
            max_flows,
        }
    }

    /// Number of in-flight flows.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Fold a packet into its flow, then evict whatever the packet's
    /// timestamp proves expired. A packet for an evicted key simply
    /// starts a new flow.
    pub fn ingest(&mut self, pkt: &PacketRecord) -> Vec<FlowState> {
        let key = FlowKey::canonical(pkt);

        if let Some(state) = self.flows.get_mut(&key) {
            self.idle_index.remove(&(state.last_seen, key));
            state.apply(pkt);
            self.idle_index.insert((state.last_seen, key));
        } else {
            let state = FlowState::new(key, pkt);
            self.idle_index.insert((state.last_seen, key));
            self.age_index.insert((state.start_time, key));
            self.flows.insert(key, state);
        }

        let mut expired = self.expire(pkt.timestamp);

        // Capacity bound: shed the stalest flow as if it had idled out.
        while self.flows.len() > self.max_flows {
            let oldest = match self.idle_index.iter().next() {
                Some(&(_, k)) => k,
                None => break,
            };
            debug!("Flow table full, evicting {}", oldest);
            expired.push(self.evict(oldest));
        }

        expired
    }

    /// Advance time and collect every flow whose expiry condition holds.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<FlowState> {
        self.expire(now)
    }

    /// Terminal: empty the table, oldest activity first.
    pub fn drain(&mut self) -> Vec<FlowState> {
        let keys: Vec<FlowKey> = self.idle_index.iter().map(|&(_, k)| k).collect();
        keys.into_iter().map(|k| self.evict(k)).collect()
    }

    fn expire(&mut self, now: DateTime<Utc>) -> Vec<FlowState> {
        let mut out = Vec::new();

        // Inactive timeout: strictly more than `inactive_timeout` of
        // silence.
        loop {
            let key = match self.idle_index.iter().next() {
                Some(&(last_seen, key)) if now - last_seen > self.inactive_timeout => key,
                _ => break,
            };
            out.push(self.evict(key));
        }

        // Active timeout: total lifetime exceeded. A flow that also
        // idled out was already removed above and is emitted once.
        loop {
            let key = match self.age_index.iter().next() {
                Some(&(start, key)) if now - start > self.active_timeout => key,
                _ => break,
            };
            out.push(self.evict(key));
        }

        out
    }

    fn evict(&mut self, key: FlowKey) -> FlowState {
        let state = self
            .flows
            .remove(&key)
            .expect("evicted key must be present");
        self.idle_index.remove(&(state.last_seen, key));
        self.age_index.remove(&(state.start_time, key));
        state
    }
}
