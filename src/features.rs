//! Feature extraction - the scoring contract
//!
//! A [`FeatureVector`] is a pure function of an expired flow. The field
//! order is frozen: it must match the column order the model was
//! trained with, so `as_array` is the only place features are
//! flattened.

use serde::Serialize;

use crate::flow::FlowState;

/// Number of features the model consumes.
pub const FEATURE_COUNT: usize = 7;

/// Column names in contract order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "duration_seconds",
    "total_fwd_packets",
    "total_bwd_packets",
    "total_fwd_bytes",
    "total_bwd_bytes",
    "flow_bytes_per_second",
    "flow_packets_per_second",
];

/// The numeric description of a finished flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub duration_seconds: f64,
    pub total_fwd_packets: u64,
    pub total_bwd_packets: u64,
    pub total_fwd_bytes: u64,
    pub total_bwd_bytes: u64,
    pub flow_bytes_per_second: f64,
    pub flow_packets_per_second: f64,
}

impl FeatureVector {
    /// Derive the features of an expired flow.
    pub fn from_flow(flow: &FlowState) -> Self {
        let duration = flow.duration();
        let duration_seconds = duration
            .num_microseconds()
            .map(|us| us as f64 / 1e6)
            .unwrap_or_else(|| duration.num_milliseconds() as f64 / 1e3);

        let total_bytes = flow.total_bytes();
        let total_packets = flow.total_packets();

        // Zero-duration flows have no meaningful rate; 0 by definition,
        // never infinity or NaN.
        let (bytes_per_second, packets_per_second) = if duration_seconds > 0.0 {
            (
                total_bytes as f64 / duration_seconds,
                total_packets as f64 / duration_seconds,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            duration_seconds,
            total_fwd_packets: flow.fwd_packets,
            total_bwd_packets: flow.bwd_packets,
            total_fwd_bytes: flow.fwd_bytes,
            total_bwd_bytes: flow.bwd_bytes,
            flow_bytes_per_second: bytes_per_second,
            flow_packets_per_second: packets_per_second,
        }
    }

    /// Flatten into model input order.
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.duration_seconds,
            self.total_fwd_packets as f64,
            self.total_bwd_packets as f64,
            self.total_fwd_bytes as f64,
            self.total_bwd_bytes as f64,
            self.flow_bytes_per_second,
            self.flow_packets_per_second,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PacketRecord;
    use crate::flow::FlowKey;
    use chrono::{Duration, Utc};
    use std::net::Ipv4Addr;

    fn sample_flow(duration_ms: i64, replies: bool) -> FlowState {
        let a = Ipv4Addr::new(192, 0, 2, 1);
        let b = Ipv4Addr::new(198, 51, 100, 9);
        let t0 = Utc::now();

        let first = PacketRecord {
            timestamp: t0,
            src_addr: a,
            dst_addr: b,
            proto: 6,
            src_port: 1234,
            dst_port: 80,
            length: 100,
        };
        let mut flow = FlowState::new(FlowKey::canonical(&first), &first);

        if replies {
            flow.apply(&PacketRecord {
                timestamp: t0 + Duration::milliseconds(duration_ms / 2),
                src_addr: b,
                dst_addr: a,
                proto: 6,
                src_port: 80,
                dst_port: 1234,
                length: 200,
            });
        }
        flow.apply(&PacketRecord {
            timestamp: t0 + Duration::milliseconds(duration_ms),
            src_addr: a,
            dst_addr: b,
            proto: 6,
            src_port: 1234,
            dst_port: 80,
            length: 100,
        });

        flow
    }

    #[test]
    fn test_short_flow_features() {
        let fv = FeatureVector::from_flow(&sample_flow(200, true));

        assert!((fv.duration_seconds - 0.2).abs() < 1e-9);
        assert_eq!(fv.total_fwd_packets, 2);
        assert_eq!(fv.total_bwd_packets, 1);
        assert_eq!(fv.total_fwd_bytes, 200);
        assert_eq!(fv.total_bwd_bytes, 200);
        assert!((fv.flow_bytes_per_second - 400.0 / 0.2).abs() < 1e-6);
        assert!((fv.flow_packets_per_second - 3.0 / 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_zero_duration_has_zero_rates() {
        let fv = FeatureVector::from_flow(&sample_flow(0, false));

        assert_eq!(fv.duration_seconds, 0.0);
        assert_eq!(fv.flow_bytes_per_second, 0.0);
        assert_eq!(fv.flow_packets_per_second, 0.0);
        assert!(fv.flow_bytes_per_second.is_finite());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let flow = sample_flow(200, true);
        assert_eq!(
            FeatureVector::from_flow(&flow),
            FeatureVector::from_flow(&flow)
        );
    }

    #[test]
    fn test_array_order_matches_names() {
        let fv = FeatureVector::from_flow(&sample_flow(200, true));
        let arr = fv.as_array();

        assert_eq!(arr.len(), FEATURE_NAMES.len());
        assert_eq!(arr[0], fv.duration_seconds);
        assert_eq!(arr[1], fv.total_fwd_packets as f64);
        assert_eq!(arr[5], fv.flow_bytes_per_second);
        assert_eq!(arr[6], fv.flow_packets_per_second);
    }

    #[test]
    fn test_counters_stay_in_64_bit_space() {
        let mut flow = sample_flow(200, false);
        flow.fwd_bytes = u32::MAX as u64 * 8;
        let fv = FeatureVector::from_flow(&flow);
        assert_eq!(fv.total_fwd_bytes, u32::MAX as u64 * 8);
    }
}
