//! Pipeline orchestration
//!
//! Three roles share the work. The producer thread owns the flow table
//! and is the only writer to it; a janitor thread asks it to advance
//! time through a wake flag. Expired flows cross a single bounded MPMC
//! queue to the scoring workers. When the queue is full the producer
//! sheds the oldest unprocessed flow rather than ever blocking: losing
//! a flow costs sensitivity, blocking the producer costs packets.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::blocker::{BlockOutcome, Blocker};
use crate::capture::{PacketSource, SourcePoll};
use crate::config::Config;
use crate::events::{Action, Event, EventSink, EventType, Severity};
use crate::features::FeatureVector;
use crate::flow::{FlowState, FlowTable};
use crate::model::AnomalyScorer;
use crate::stats::EngineStats;

const SHUTDOWN_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const STATS_LOG_INTERVAL: StdDuration = StdDuration::from_secs(10);
const DEGRADED_ALARM_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// How a finished engine run came to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    /// The source ended and everything was drained
    Clean,
    /// A shutdown signal arrived
    Interrupted,
    /// Blocking was disabled by a permanent firewall failure
    Degraded,
}

enum WorkItem {
    Flow(FlowState),
    Shutdown,
}

/// Everything a scoring worker needs.
struct WorkerCtx {
    scorer: Arc<AnomalyScorer>,
    blocker: Arc<Blocker>,
    sink: Arc<dyn EventSink>,
    stats: Arc<EngineStats>,
    block_ttl: Duration,
    dry_run: bool,
}

/// The assembled engine. Construction wires the components together;
/// [`Engine::run`] occupies the calling thread as the producer until
/// shutdown.
pub struct Engine {
    config: Config,
    source: Box<dyn PacketSource>,
    scorer: Arc<AnomalyScorer>,
    blocker: Arc<Blocker>,
    sink: Arc<dyn EventSink>,
    stats: Arc<EngineStats>,
    shutdown: Arc<AtomicBool>,
    dry_run: bool,
}

impl Engine {
    pub fn new(
        config: Config,
        source: Box<dyn PacketSource>,
        scorer: Arc<AnomalyScorer>,
        blocker: Arc<Blocker>,
        sink: Arc<dyn EventSink>,
        shutdown: Arc<AtomicBool>,
        dry_run: bool,
    ) -> Self {
        Self {
            config,
            source,
            scorer,
            blocker,
            sink,
            stats: Arc::new(EngineStats::new()),
            shutdown,
            dry_run,
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Run until the source ends or a shutdown signal arrives.
    pub fn run(mut self) -> EngineExit {
        let worker_count = self.config.effective_workers();
        let (tx, rx) = bounded::<WorkItem>(self.config.queue_size);
        let tick_requested = Arc::new(AtomicBool::new(false));

        info!(
            "Engine starting: {} worker(s), queue {}, timeouts {}s/{}s",
            worker_count,
            self.config.queue_size,
            self.config.inactive_timeout_s,
            self.config.active_timeout_s
        );

        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let rx = rx.clone();
            let ctx = WorkerCtx {
                scorer: Arc::clone(&self.scorer),
                blocker: Arc::clone(&self.blocker),
                sink: Arc::clone(&self.sink),
                stats: Arc::clone(&self.stats),
                block_ttl: Duration::minutes(self.config.block_ttl_minutes as i64),
                dry_run: self.dry_run,
            };
            let handle = thread::Builder::new()
                .name(format!("scorer-{}", n))
                .spawn(move || worker_loop(rx, ctx))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        let janitor = {
            let shutdown = Arc::clone(&self.shutdown);
            let tick_requested = Arc::clone(&tick_requested);
            let blocker = Arc::clone(&self.blocker);
            let sink = Arc::clone(&self.sink);
            let stats = Arc::clone(&self.stats);
            let tick_interval = StdDuration::from_millis(self.config.tick_interval_ms);
            let sweep_interval = StdDuration::from_secs(self.config.sweep_interval_s);
            thread::Builder::new()
                .name("janitor".to_string())
                .spawn(move || {
                    janitor_loop(
                        shutdown,
                        tick_requested,
                        blocker,
                        sink,
                        stats,
                        tick_interval,
                        sweep_interval,
                    )
                })
                .expect("failed to spawn janitor thread")
        };

        // Producer loop: this thread owns the flow table.
        let mut table = FlowTable::new(
            Duration::seconds(self.config.inactive_timeout_s as i64),
            Duration::seconds(self.config.active_timeout_s as i64),
            self.config.max_flows,
        );

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping capture");
                break;
            }

            if tick_requested.swap(false, Ordering::SeqCst) {
                for flow in table.tick(Utc::now()) {
                    enqueue_flow(&tx, &rx, &self.stats, flow);
                }
            }

            match self.source.poll() {
                Ok(SourcePoll::Packet(pkt)) => {
                    for flow in table.ingest(&pkt) {
                        enqueue_flow(&tx, &rx, &self.stats, flow);
                    }
                }
                Ok(SourcePoll::Idle) => {}
                Ok(SourcePoll::EndOfStream) => {
                    info!("Packet source ended");
                    break;
                }
                Err(e) => {
                    error!("Capture failed: {}", e);
                    break;
                }
            }
        }

        let interrupted = self.shutdown.load(Ordering::SeqCst);

        // Clean shutdown: flush the table, one sentinel per worker,
        // then wait out the drain.
        for flow in table.drain() {
            enqueue_flow(&tx, &rx, &self.stats, flow);
        }
        for _ in 0..worker_count {
            let _ = tx.send(WorkItem::Shutdown);
        }

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        for handle in workers {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(StdDuration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Worker did not stop within {:?}, abandoning", SHUTDOWN_TIMEOUT);
            }
        }

        self.shutdown.store(true, Ordering::SeqCst);
        let _ = janitor.join();

        if let Some(capture) = self.source.stats() {
            info!(
                "Final capture stats: packets={}, bytes={}, parse_errors={}, non_ipv4={}",
                capture.packets_captured,
                capture.bytes_captured,
                capture.parse_errors,
                capture.non_ipv4_dropped
            );
        }
        let snap = self.stats.snapshot();
        info!(
            "Final engine stats: flows={}, dropped={}, scored={}, anomalies={}, blocked={}",
            snap.flows_emitted,
            snap.dropped_flows,
            snap.flows_scored,
            snap.anomalies_detected,
            snap.blocks_installed
        );

        if snap.degraded || self.blocker.is_disabled() {
            EngineExit::Degraded
        } else if interrupted {
            EngineExit::Interrupted
        } else {
            EngineExit::Clean
        }
    }
}

/// Hand a flow to the workers without ever blocking. On a full queue
/// the oldest unprocessed flow is shed and counted.
fn enqueue_flow(
    tx: &Sender<WorkItem>,
    rx: &Receiver<WorkItem>,
    stats: &EngineStats,
    flow: FlowState,
) {
    stats.flows_emitted.fetch_add(1, Ordering::Relaxed);

    let mut item = WorkItem::Flow(flow);
    loop {
        match tx.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(returned)) => {
                item = returned;
                if rx.try_recv().is_ok() {
                    stats.dropped_flows.fetch_add(1, Ordering::Relaxed);
                }
                // Either we freed a slot or a worker did; retry.
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

fn worker_loop(rx: Receiver<WorkItem>, ctx: WorkerCtx) {
    while let Ok(item) = rx.recv() {
        match item {
            WorkItem::Shutdown => break,
            WorkItem::Flow(flow) => process_flow(&ctx, flow),
        }
    }
}

/// Score one expired flow and act on the verdict. Per-flow errors stay
/// here: fail open, count, keep the pipeline alive.
fn process_flow(ctx: &WorkerCtx, flow: FlowState) {
    let features = FeatureVector::from_flow(&flow);

    let verdict = match ctx.scorer.score(&features) {
        Ok(v) => v,
        Err(e) => {
            ctx.stats.scoring_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Scoring failed for {} ({}), treating as benign", flow.key, e);
            return;
        }
    };
    ctx.stats.flows_scored.fetch_add(1, Ordering::Relaxed);

    if !verdict.is_anomaly {
        debug!("Flow {} scored {:.3}", flow.key, verdict.score);
        return;
    }

    ctx.stats.anomalies_detected.fetch_add(1, Ordering::Relaxed);
    warn!(
        "Anomalous flow {} (score {:.3}, {} pkts, {} bytes)",
        flow.key,
        verdict.score,
        flow.total_packets(),
        flow.total_bytes()
    );

    let source_addr = flow.forward_addr;
    let (dest_addr, dst_port) = flow.backward_endpoint();
    let description = format!("anomalous flow (score {:.3})", verdict.score);

    let action = if ctx.dry_run {
        Action::Logged
    } else {
        match ctx
            .blocker
            .block(source_addr, &description, ctx.block_ttl, Utc::now())
        {
            BlockOutcome::Blocked => {
                ctx.stats.blocks_installed.fetch_add(1, Ordering::Relaxed);
                Action::Blocked
            }
            BlockOutcome::AlreadyBlocked => Action::Blocked,
            BlockOutcome::Rejected => {
                ctx.stats.blocks_rejected.fetch_add(1, Ordering::Relaxed);
                Action::Logged
            }
            BlockOutcome::Failed(e) => {
                ctx.stats.block_failures.fetch_add(1, Ordering::Relaxed);
                if e.is_permanent() {
                    ctx.stats.degraded.store(true, Ordering::SeqCst);
                }
                Action::BlockFailed
            }
        }
    };

    ctx.sink.emit(Event {
        event_type: EventType::Anomaly,
        severity: Severity::from_score(verdict.score),
        source_addr,
        dest_addr,
        proto: flow.proto(),
        src_port: flow.forward_port,
        dst_port,
        description,
        anomaly_score: verdict.score,
        action_taken: action,
        timestamp: Utc::now(),
    });
}

/// Periodic housekeeping: wake the producer's flow-table tick, sweep
/// expired blocks, log stats, and raise the degraded alarm.
fn janitor_loop(
    shutdown: Arc<AtomicBool>,
    tick_requested: Arc<AtomicBool>,
    blocker: Arc<Blocker>,
    sink: Arc<dyn EventSink>,
    stats: Arc<EngineStats>,
    tick_interval: StdDuration,
    sweep_interval: StdDuration,
) {
    let mut last_sweep = Instant::now();
    let mut last_stats = Instant::now();
    let mut last_alarm: Option<Instant> = None;

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(tick_interval);

        tick_requested.store(true, Ordering::SeqCst);

        if last_sweep.elapsed() >= sweep_interval {
            last_sweep = Instant::now();
            let now = Utc::now();
            for addr in blocker.sweep(now) {
                stats.blocks_expired.fetch_add(1, Ordering::Relaxed);
                sink.emit(unblock_event(addr));
            }
        }

        if blocker.is_disabled() {
            stats.degraded.store(true, Ordering::SeqCst);
        }

        if stats.degraded.load(Ordering::SeqCst)
            && last_alarm.map_or(true, |t| t.elapsed() >= DEGRADED_ALARM_INTERVAL)
        {
            last_alarm = Some(Instant::now());
            error!("Engine degraded: scoring continues, blocking is disabled");
            sink.emit(alarm_event());
        }

        if last_stats.elapsed() >= STATS_LOG_INTERVAL {
            last_stats = Instant::now();
            let snap = stats.snapshot();
            info!(
                "Stats: flows={}, dropped={}, scored={}, anomalies={}, blocked={}, expired={}",
                snap.flows_emitted,
                snap.dropped_flows,
                snap.flows_scored,
                snap.anomalies_detected,
                snap.blocks_installed,
                snap.blocks_expired
            );
        }
    }
}

fn unblock_event(addr: Ipv4Addr) -> Event {
    Event {
        event_type: EventType::Unblock,
        severity: Severity::Low,
        source_addr: addr,
        dest_addr: Ipv4Addr::UNSPECIFIED,
        proto: 0,
        src_port: 0,
        dst_port: 0,
        description: "block expired".to_string(),
        anomaly_score: 0.0,
        action_taken: Action::Logged,
        timestamp: Utc::now(),
    }
}

fn alarm_event() -> Event {
    Event {
        event_type: EventType::Alarm,
        severity: Severity::High,
        source_addr: Ipv4Addr::UNSPECIFIED,
        dest_addr: Ipv4Addr::UNSPECIFIED,
        proto: 0,
        src_port: 0,
        dst_port: 0,
        description: "blocking disabled, firewall permanently unavailable".to_string(),
        anomaly_score: 0.0,
        action_taken: Action::BlockFailed,
        timestamp: Utc::now(),
    }
}
