//! Engine configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then
//! `NGFW_*` environment variables. CLI flags override last, in
//! `main`.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface to observe
    pub interface: String,

    /// Path to the serialized anomaly model
    pub model_path: PathBuf,

    /// Decision threshold; scores below it are anomalous
    pub threshold: f64,

    /// Seconds of silence before a flow expires
    pub inactive_timeout_s: u64,

    /// Maximum total flow lifetime in seconds
    pub active_timeout_s: u64,

    /// Lifetime of an installed block
    pub block_ttl_minutes: u64,

    /// Flow table cardinality bound
    pub max_flows: usize,

    /// Capacity of the expired-flow queue
    pub queue_size: usize,

    /// Scoring worker threads (0 = CPU count)
    pub workers: usize,

    /// Janitor wake interval in milliseconds
    pub tick_interval_ms: u64,

    /// Seconds between block-expiry sweeps
    pub sweep_interval_s: u64,

    /// Capacity of the event sink queue
    pub event_queue_size: usize,

    /// Capture filter expression, passed through to the source
    pub bpf_filter: Option<String>,

    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format: "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: String::new(),
            model_path: PathBuf::new(),
            threshold: -0.2,
            inactive_timeout_s: 15,
            active_timeout_s: 1800,
            block_ttl_minutes: 60,
            max_flows: 100_000,
            queue_size: 1024,
            workers: 0,
            tick_interval_ms: 1000,
            sweep_interval_s: 300,
            event_queue_size: 1024,
            bpf_filter: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Build the configuration from defaults, an optional file, and
    /// the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&content).with_context(|| "Failed to parse configuration")
    }

    /// Overlay `NGFW_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_string("NGFW_INTERFACE") {
            self.interface = v;
        }
        if let Some(v) = env_string("NGFW_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse("NGFW_THRESHOLD")? {
            self.threshold = v;
        }
        if let Some(v) = env_parse("NGFW_INACTIVE_TIMEOUT_S")? {
            self.inactive_timeout_s = v;
        }
        if let Some(v) = env_parse("NGFW_ACTIVE_TIMEOUT_S")? {
            self.active_timeout_s = v;
        }
        if let Some(v) = env_parse("NGFW_BLOCK_TTL_MINUTES")? {
            self.block_ttl_minutes = v;
        }
        if let Some(v) = env_parse("NGFW_MAX_FLOWS")? {
            self.max_flows = v;
        }
        if let Some(v) = env_parse("NGFW_QUEUE_SIZE")? {
            self.queue_size = v;
        }
        if let Some(v) = env_parse("NGFW_WORKERS")? {
            self.workers = v;
        }
        if let Some(v) = env_parse("NGFW_TICK_INTERVAL_MS")? {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("NGFW_SWEEP_INTERVAL_S")? {
            self.sweep_interval_s = v;
        }
        if let Some(v) = env_parse("NGFW_EVENT_QUEUE_SIZE")? {
            self.event_queue_size = v;
        }
        if let Some(v) = env_string("NGFW_BPF_FILTER") {
            self.bpf_filter = Some(v);
        }
        if let Some(v) = env_string("NGFW_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_string("NGFW_LOG_FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }

    /// Number of worker threads after resolving the CPU-count default.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            bail!("No capture interface configured (NGFW_INTERFACE or --interface)");
        }

        if self.model_path.as_os_str().is_empty() {
            bail!("No model path configured (NGFW_MODEL_PATH or --model)");
        }

        if !self.threshold.is_finite() {
            bail!("Threshold must be a finite number");
        }

        if self.inactive_timeout_s == 0 || self.active_timeout_s == 0 {
            bail!("Flow timeouts must be positive");
        }

        if self.inactive_timeout_s >= self.active_timeout_s {
            bail!(
                "Inactive timeout ({}s) must be below active timeout ({}s)",
                self.inactive_timeout_s,
                self.active_timeout_s
            );
        }

        if self.block_ttl_minutes == 0 {
            bail!("Block TTL must be positive");
        }

        if self.max_flows == 0 {
            bail!("max_flows must be at least 1");
        }

        if self.queue_size == 0 || self.event_queue_size == 0 {
            bail!("Queue sizes must be at least 1");
        }

        if self.tick_interval_ms == 0 {
            bail!("Tick interval must be positive");
        }

        if self.logging.format != "json" && self.logging.format != "pretty" {
            bail!(
                "Invalid log format: {}. Must be 'json' or 'pretty'",
                self.logging.format
            );
        }

        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_string(key) {
        Some(raw) => {
            let parsed = raw
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Environment variables are process-global; serialize the tests
    // that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn valid_config() -> Config {
        Config {
            interface: "eth0".to_string(),
            model_path: PathBuf::from("/opt/ngfw/model.json"),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.threshold, -0.2);
        assert_eq!(config.inactive_timeout_s, 15);
        assert_eq!(config.active_timeout_s, 1800);
        assert_eq!(config.block_ttl_minutes, 60);
        assert_eq!(config.max_flows, 100_000);
        assert_eq!(config.queue_size, 1024);
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_parse_config_file() {
        let toml_content = r#"
interface = "ens3"
model_path = "/opt/ngfw/model.json"
threshold = -0.35
inactive_timeout_s = 30
queue_size = 2048

[logging]
level = "debug"
format = "json"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.interface, "ens3");
        assert_eq!(config.threshold, -0.35);
        assert_eq!(config.inactive_timeout_s, 30);
        assert_eq!(config.queue_size, 2048);
        assert_eq!(config.active_timeout_s, 1800); // untouched default
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_interface_rejected() {
        let mut config = valid_config();
        config.interface.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ordering_enforced() {
        let mut config = valid_config();
        config.inactive_timeout_s = 3600;
        config.active_timeout_s = 1800;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut config = valid_config();
        config.queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let mut config = valid_config();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock();
        env::set_var("NGFW_THRESHOLD", "-0.45");
        env::set_var("NGFW_MAX_FLOWS", "5000");

        let mut config = valid_config();
        config.apply_env().unwrap();

        assert_eq!(config.threshold, -0.45);
        assert_eq!(config.max_flows, 5000);

        env::remove_var("NGFW_THRESHOLD");
        env::remove_var("NGFW_MAX_FLOWS");
    }

    #[test]
    fn test_env_parse_error_is_contextual() {
        let _guard = ENV_LOCK.lock();
        env::set_var("NGFW_SWEEP_INTERVAL_S", "soon");
        let mut config = valid_config();
        let err = config.apply_env().unwrap_err();
        assert!(err.to_string().contains("NGFW_SWEEP_INTERVAL_S"));
        env::remove_var("NGFW_SWEEP_INTERVAL_S");
    }
}
