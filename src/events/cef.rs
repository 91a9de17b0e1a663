//! Common Event Format rendering
//!
//! ArcSight/Splunk-compatible single-line encoding:
//! `CEF:0|vendor|product|version|sig|name|severity|extensions`.

use super::Event;

const CEF_VERSION: &str = "0";
const DEVICE_VENDOR: &str = "NGFW Congo";
const DEVICE_PRODUCT: &str = "Behavioral NGFW";
const DEVICE_VERSION: &str = "1.0";

/// Render an event as one CEF line.
///
/// `|` in the name and `=` in the message are replaced with `_` so the
/// line stays parseable.
pub fn format_event(event: &Event) -> String {
    let (signature_id, name) = event.event_type.signature();
    let name = name.replace('|', "_");
    let msg = event.description.replace('=', "_");

    let extensions = [
        format!("src={}", event.source_addr),
        format!("dst={}", event.dest_addr),
        format!("proto={}", event.proto),
        format!("srcPort={}", event.src_port),
        format!("dstPort={}", event.dst_port),
        format!("anomalyScore={}", event.anomaly_score),
        format!("act={}", event.action_taken.as_str()),
        format!("msg={}", msg),
    ];

    format!(
        "CEF:{}|{}|{}|{}|{}|{}|{}|{}",
        CEF_VERSION,
        DEVICE_VENDOR,
        DEVICE_PRODUCT,
        DEVICE_VERSION,
        signature_id,
        name,
        event.severity.cef_level(),
        extensions.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::sample_event;
    use crate::events::{Action, EventType, Severity};

    #[test]
    fn test_cef_line_layout() {
        let line = format_event(&sample_event());

        assert!(line.starts_with("CEF:0|NGFW Congo|Behavioral NGFW|1.0|1000|Network Anomaly|7|"));
        assert!(line.contains("src=203.0.113.9"));
        assert!(line.contains("dst=198.51.100.4"));
        assert!(line.contains("proto=6"));
        assert!(line.contains("srcPort=44123"));
        assert!(line.contains("dstPort=22"));
        assert!(line.contains("anomalyScore=-0.912"));
        assert!(line.contains("act=blocked"));
    }

    #[test]
    fn test_equals_in_message_escaped() {
        let mut event = sample_event();
        event.description = "score=-0.9 threshold=-0.2".to_string();

        let line = format_event(&event);
        assert!(line.ends_with("msg=score_-0.9 threshold_-0.2"));
    }

    #[test]
    fn test_severity_digit_tracks_band() {
        let mut event = sample_event();
        event.severity = Severity::Medium;
        assert!(format_event(&event).contains("|1000|Network Anomaly|5|"));

        event.severity = Severity::Low;
        event.event_type = EventType::Unblock;
        event.action_taken = Action::Logged;
        let line = format_event(&event);
        assert!(line.contains("|1001|Block Expired|3|"));
        assert!(line.contains("act=logged"));
    }
}
