//! NGFW Congo - Behavioral Network Firewall Engine
//!
//! Captures traffic, aggregates flows, scores them against an
//! isolation forest model, and blocks anomalous sources via nftables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ngfw_congo::blocker::Blocker;
use ngfw_congo::capture::{print_interfaces, CaptureError, PnetSource};
use ngfw_congo::config::Config;
use ngfw_congo::events::{CefSink, ChannelSink, EventSink, FanoutSink, LogSink};
use ngfw_congo::firewall::NftablesAdmin;
use ngfw_congo::model::AnomalyScorer;
use ngfw_congo::pipeline::{Engine, EngineExit};

const EXIT_CLEAN: u8 = 0;
const EXIT_STARTUP_FAILURE: u8 = 1;
const EXIT_RUNTIME_FATAL: u8 = 2;
const EXIT_SIGNAL: u8 = 130;

/// NGFW Congo Engine
#[derive(Parser, Debug)]
#[command(name = "ngfw-congo")]
#[command(version)]
#[command(about = "Behavioral NGFW: flow anomaly detection and active blocking", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to observe (overrides config)
    #[arg(short, long)]
    interface: Option<String>,

    /// Path to the anomaly model artifact (overrides config)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Decision threshold (overrides config)
    #[arg(short, long)]
    threshold: Option<f64>,

    /// List available network interfaces
    #[arg(long)]
    list_interfaces: bool,

    /// Run in debug mode (verbose logging)
    #[arg(short, long)]
    debug: bool,

    /// Score flows but never touch the firewall
    #[arg(long)]
    dry_run: bool,

    /// Also append events as CEF lines to this file
    #[arg(long)]
    cef_log: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.list_interfaces {
        print_interfaces();
        return ExitCode::from(EXIT_CLEAN);
    }

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            // Startup failures land here before logging may be up
            eprintln!("ngfw-congo: {:#}", e);
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

fn run(args: Args) -> Result<u8> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(interface) = args.interface {
        config.interface = interface;
    }
    if let Some(model) = args.model {
        config.model_path = model;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }

    config.validate()?;
    setup_logging(&config, args.debug)?;

    info!("NGFW Congo starting...");
    info!("Interface: {}", config.interface);
    info!("Model: {:?}", config.model_path);
    info!("Threshold: {}", config.threshold);
    if args.dry_run {
        info!("Dry run mode - the firewall will not be touched");
    }

    // Startup-fatal pieces first: model, then capture, then firewall.
    let scorer = Arc::new(
        AnomalyScorer::load(&config.model_path, config.threshold)
            .with_context(|| "Failed to load anomaly model")?,
    );

    let source = PnetSource::open(&config.interface, config.bpf_filter.as_deref()).map_err(
        |e| match &e {
            CaptureError::PermissionDenied(_) | CaptureError::InterfaceUnavailable(_) => {
                anyhow::anyhow!("{}", e)
            }
            _ => anyhow::anyhow!("Failed to open capture: {}", e),
        },
    )?;

    let blocker = Arc::new(Blocker::new(Arc::new(NftablesAdmin::new())));
    if !args.dry_run {
        let ttl = Duration::minutes(config.block_ttl_minutes as i64);
        blocker
            .init(ttl, Utc::now())
            .with_context(|| "Failed to initialize firewall chain")?;
    }

    let inner_sink: Box<dyn EventSink> = match &args.cef_log {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open CEF log {:?}", path))?;
            Box::new(FanoutSink::new(vec![
                Box::new(LogSink),
                Box::new(CefSink::new(file)),
            ]))
        }
        None => Box::new(LogSink),
    };

    let (sink, sink_handle) = ChannelSink::spawn(config.event_queue_size, inner_sink);
    let sink = Arc::new(sink);

    // Shutdown on Ctrl+C / SIGTERM
    let shutdown = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let engine = Engine::new(
        config,
        Box::new(source),
        scorer,
        blocker,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        shutdown,
        args.dry_run,
    );

    let exit = engine.run();

    // Last sink handle: dropping it closes the channel so the drain
    // thread can finish flushing. Bounded wait; late events are lost.
    drop(sink);
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while !sink_handle.is_finished() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    if sink_handle.is_finished() {
        let _ = sink_handle.join();
    }

    info!("NGFW Congo stopped");

    Ok(match exit {
        EngineExit::Clean => EXIT_CLEAN,
        EngineExit::Interrupted => EXIT_SIGNAL,
        EngineExit::Degraded => {
            error!("Engine was degraded at shutdown (blocking disabled)");
            EXIT_RUNTIME_FATAL
        }
    })
}

/// Setup logging based on configuration
fn setup_logging(config: &Config, debug: bool) -> Result<()> {
    let level = if debug {
        Level::DEBUG
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("ngfw_congo={}", level).parse().unwrap())
        .add_directive(format!("ngfw={}", level).parse().unwrap());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }

    Ok(())
}
