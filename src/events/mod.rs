//! Security event records and sinks
//!
//! Events are serialized as UTF-8 JSON. Sinks may be slow; the bounded
//! channel sink never blocks the caller and drops the event (never the
//! decision behind it) on overflow.

pub mod cef;

use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A flow scored below the anomaly threshold
    Anomaly,
    /// A block expired and was removed
    Unblock,
    /// The engine is degraded (blocking disabled)
    Alarm,
}

impl EventType {
    /// CEF signature id and event name.
    pub fn signature(&self) -> (&'static str, &'static str) {
        match self {
            EventType::Anomaly => ("1000", "Network Anomaly"),
            EventType::Unblock => ("1001", "Block Expired"),
            EventType::Alarm => ("1002", "Engine Degraded"),
        }
    }
}

/// Severity bands derived from the anomaly score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// score < -0.5 is high, score < -0.2 medium, anything else low.
    pub fn from_score(score: f64) -> Self {
        if score < -0.5 {
            Severity::High
        } else if score < -0.2 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// CEF severity digit.
    pub fn cef_level(&self) -> u8 {
        match self {
            Severity::High => 7,
            Severity::Medium => 5,
            Severity::Low => 3,
        }
    }
}

/// What the engine did about an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Blocked,
    Logged,
    BlockFailed,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Blocked => "blocked",
            Action::Logged => "logged",
            Action::BlockFailed => "block_failed",
        }
    }
}

/// One emitted security event. Immutable after emission.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub severity: Severity,
    pub source_addr: Ipv4Addr,
    pub dest_addr: Ipv4Addr,
    pub proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub description: String,
    pub anomaly_score: f64,
    pub action_taken: Action,
    pub timestamp: DateTime<Utc>,
}

/// Consumer of event records.
pub trait EventSink: Send + Sync {
    /// Hand over an event. Must not block the caller.
    fn emit(&self, event: Event);

    /// Events lost to backpressure, if the sink counts them.
    fn dropped(&self) -> u64 {
        0
    }
}

/// Sink that writes each event as a JSON line to the structured log.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "ngfw::events", "{}", json),
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
    }
}

/// Sink rendering each event as one CEF line into a writer.
pub struct CefSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> CefSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> EventSink for CefSink<W> {
    fn emit(&self, event: Event) {
        let line = cef::format_event(&event);
        let mut writer = self.writer.lock();
        if writeln!(writer, "{}", line).is_err() {
            warn!("Failed to write CEF event");
        }
    }
}

/// Forwards each event to every attached sink.
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Bounded hand-off in front of a possibly slow sink.
///
/// `emit` is try_send: when the queue is full the event is counted and
/// dropped. A drain thread forwards to the inner sink and exits when
/// the last `ChannelSink` clone is dropped.
pub struct ChannelSink {
    tx: Sender<Event>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Spawn the drain thread and return the sink plus its join
    /// handle.
    pub fn spawn(
        capacity: usize,
        inner: Box<dyn EventSink>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = bounded::<Event>(capacity);

        let handle = std::thread::Builder::new()
            .name("event-sink".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    inner.emit(event);
                }
            })
            .expect("failed to spawn event sink thread");

        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            handle,
        )
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Collects emitted events for assertions.
    #[derive(Default)]
    pub(crate) struct CollectingSink {
        pub events: Mutex<Vec<Event>>,
    }

    impl CollectingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn collected(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl EventSink for CollectingSink {
        fn emit(&self, event: Event) {
            self.events.lock().push(event);
        }
    }

    pub(crate) fn sample_event() -> Event {
        Event {
            event_type: EventType::Anomaly,
            severity: Severity::High,
            source_addr: Ipv4Addr::new(203, 0, 113, 9),
            dest_addr: Ipv4Addr::new(198, 51, 100, 4),
            proto: 6,
            src_port: 44123,
            dst_port: 22,
            description: "anomalous flow (score -0.912)".to_string(),
            anomaly_score: -0.912,
            action_taken: Action::Blocked,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Severity::from_score(-0.9), Severity::High);
        assert_eq!(Severity::from_score(-0.5), Severity::Medium);
        assert_eq!(Severity::from_score(-0.3), Severity::Medium);
        assert_eq!(Severity::from_score(-0.2), Severity::Low);
        assert_eq!(Severity::from_score(0.1), Severity::Low);

        assert_eq!(Severity::High.cef_level(), 7);
        assert_eq!(Severity::Medium.cef_level(), 5);
        assert_eq!(Severity::Low.cef_level(), 3);
    }

    #[test]
    fn test_event_json_schema() {
        let json = serde_json::to_string(&sample_event()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event_type"], "anomaly");
        assert_eq!(value["severity"], "high");
        assert_eq!(value["source_addr"], "203.0.113.9");
        assert_eq!(value["dest_addr"], "198.51.100.4");
        assert_eq!(value["proto"], 6);
        assert_eq!(value["action_taken"], "blocked");
        assert!(value["anomaly_score"].as_f64().unwrap() < 0.0);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_channel_sink_overflow_drops_events() {
        let collector = CollectingSink::new();
        let inner = Arc::clone(&collector);

        struct Blocked(Arc<CollectingSink>, Arc<std::sync::atomic::AtomicBool>);
        impl EventSink for Blocked {
            fn emit(&self, event: Event) {
                while !self.1.load(Ordering::SeqCst) {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                self.0.emit(event);
            }
        }

        let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (sink, handle) = ChannelSink::spawn(
            4,
            Box::new(Blocked(inner, Arc::clone(&release))),
        );

        // Queue capacity 4 plus one in-flight; everything beyond is shed
        for _ in 0..32 {
            sink.emit(sample_event());
        }
        assert!(sink.dropped() > 0);
        assert!(sink.dropped() < 32);

        release.store(true, Ordering::SeqCst);
        drop(sink);
        handle.join().unwrap();

        let delivered = collector.collected().len() as u64;
        assert!(delivered >= 4);
        assert!(delivered < 32);
    }

    #[test]
    fn test_cef_sink_writes_one_line_per_event() {
        let buffer: Vec<u8> = Vec::new();
        let sink = CefSink::new(buffer);

        sink.emit(sample_event());
        sink.emit(sample_event());

        let written = sink.writer.into_inner();
        let text = String::from_utf8(written).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("CEF:0|NGFW Congo|"));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = CollectingSink::new();
        let second = CollectingSink::new();

        struct Fwd(Arc<CollectingSink>);
        impl EventSink for Fwd {
            fn emit(&self, event: Event) {
                self.0.emit(event);
            }
        }

        let fanout = FanoutSink::new(vec![
            Box::new(Fwd(Arc::clone(&first))),
            Box::new(Fwd(Arc::clone(&second))),
        ]);
        fanout.emit(sample_event());

        assert_eq!(first.collected().len(), 1);
        assert_eq!(second.collected().len(), 1);
    }

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let collector = CollectingSink::new();
        let inner = Arc::clone(&collector);

        struct Fwd(Arc<CollectingSink>);
        impl EventSink for Fwd {
            fn emit(&self, event: Event) {
                self.0.emit(event);
            }
        }

        let (sink, handle) = ChannelSink::spawn(64, Box::new(Fwd(inner)));
        for i in 0..10u16 {
            let mut event = sample_event();
            event.src_port = i;
            sink.emit(event);
        }
        drop(sink);
        handle.join().unwrap();

        let ports: Vec<u16> = collector.collected().iter().map(|e| e.src_port).collect();
        assert_eq!(ports, (0..10).collect::<Vec<u16>>());
    }
}
