//! Configuration loading and validation
//!
//! Both processes read one TOML file. Resolution priority for the file
//! path follows the usual order: command-line argument, then environment
//! variable, then the compiled default location. Configuration errors are
//! fatal at startup, never at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default config location when neither CLI argument nor env var is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/blip/config.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "BLIP_CONFIG";

/// Complete configuration for the scanner and ingest processes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub admission: AdmissionConfig,
    pub denylist: DenylistConfig,
    pub pipeline: PipelineConfig,
    pub heartbeat: HeartbeatConfig,
    pub database: DatabaseConfig,
}

/// Scanner identity and channel naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Unique identifier for this scanner; used in the channel name and
    /// stamped into every RawEvent.
    pub id: String,

    /// Bluetooth adapter name handed to the radio driver collaborator.
    pub adapter: String,

    /// Channel name prefix (events publish on `<prefix>/<id>/events`).
    pub channel_prefix: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            id: "scanner-01".to_string(),
            adapter: "hci0".to_string(),
            channel_prefix: "blip".to_string(),
        }
    }
}

/// Admission filter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Minimum seconds between forwarding the same address.
    pub window_secs: u64,

    /// Hard upper bound on tracked addresses.
    pub cache_capacity: usize,

    /// Entries not forwarded within this horizon are swept. Much larger
    /// than the duplicate window.
    pub stale_horizon_secs: u64,

    /// Interval of the periodic staleness sweep.
    pub sweep_interval_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            cache_capacity: 4096,
            stale_horizon_secs: 3600,
            sweep_interval_secs: 600,
        }
    }
}

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn stale_horizon(&self) -> Duration {
        Duration::from_secs(self.stale_horizon_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Denylist rule set. Each rule kind is independently configurable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DenylistConfig {
    pub enabled: bool,

    /// Exact device addresses to drop.
    pub addresses: Vec<String>,

    /// Address prefixes to drop (e.g. an OUI like "F0:18:98").
    pub address_prefixes: Vec<String>,

    /// Regex patterns matched against the advertised display name.
    pub name_patterns: Vec<String>,
}

/// Processing pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed worker pool size.
    pub workers: usize,

    /// Bounded per-worker queue depth; the backpressure point.
    pub queue_depth: usize,

    /// Upper bound on a single decode call.
    pub decode_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 64,
            decode_timeout_ms: 250,
        }
    }
}

impl PipelineConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

/// Scanner heartbeat/status publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Storage location for the ingest process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/blip/blip.db"),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path: CLI argument, then env var, then the
    /// compiled default.
    pub fn resolve_path(cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return PathBuf::from(path);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Check invariants that must hold before either process starts.
    pub fn validate(&self) -> Result<()> {
        if self.scanner.id.is_empty() {
            return Err(Error::Config("scanner.id must not be empty".to_string()));
        }
        if self.admission.window_secs == 0 {
            return Err(Error::Config(
                "admission.window_secs must be positive".to_string(),
            ));
        }
        if self.admission.cache_capacity == 0 {
            return Err(Error::Config(
                "admission.cache_capacity must be positive".to_string(),
            ));
        }
        if self.admission.stale_horizon_secs <= self.admission.window_secs {
            return Err(Error::Config(
                "admission.stale_horizon_secs must exceed admission.window_secs".to_string(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(Error::Config(
                "pipeline.workers must be positive".to_string(),
            ));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(Error::Config(
                "pipeline.queue_depth must be positive".to_string(),
            ));
        }
        if self.pipeline.decode_timeout_ms == 0 {
            return Err(Error::Config(
                "pipeline.decode_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
