//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for measurement
//! sessions. Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables (prefixed with `SWEEP_DAQ_`, nested keys joined by `__`)
//!
//! # Example
//! ```no_run
//! use sweep_daq::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load_from("config/measurement.toml")?;
//! settings.validate()?;
//! println!("Experiment: {}", settings.run.experiment_type);
//! # Ok(())
//! # }
//! ```
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [storage]
//! output_dir = "data/odmr"
//!
//! [run]
//! experiment_type = "odmr"
//! dynamic_steps = 101
//! averages = 20
//! sleep = "5ms"
//!
//! [run.sensor]
//! channels = 2
//! samples = 64
//!
//! [run.dynamic_devices.mw_source]
//! start = 2.80e9
//! stop = 2.95e9
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Free-form configuration block handed to an instrument implementation.
pub type DeviceBlock = serde_json::Map<String, serde_json::Value>;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where saved runs are written
    #[serde(default)]
    pub storage: StorageConfig,
    /// The measurement itself
    pub run: RunParameters,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Encoding used for the aggregation buffer on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BufferFormat {
    /// Exact binary encoding (bincode)
    #[default]
    Bincode,
    /// Human-readable JSON
    Json,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for saved runs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Buffer encoding
    #[serde(default)]
    pub format: BufferFormat,
    /// Also write a long-format CSV next to the buffer (needs `storage_csv`)
    #[serde(default)]
    pub csv_export: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: BufferFormat::default(),
            csv_export: false,
        }
    }
}

/// Fixed delays required by the timing hardware between protocol stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Settle time after the synchroniser starts generating timing
    #[serde(default = "default_sync_settle", with = "humantime_serde")]
    pub sync_settle: Duration,
    /// Settle time after the sensor is opened
    #[serde(default = "default_sensor_settle", with = "humantime_serde")]
    pub sensor_settle: Duration,
    /// Settle time after every dynamic step advance
    #[serde(default = "default_step_settle", with = "humantime_serde")]
    pub step_settle: Duration,
    /// Delay after re-arming the synchroniser between cycles
    #[serde(default = "default_rearm_delay", with = "humantime_serde")]
    pub rearm_delay: Duration,
    /// Upper bound on any single open, stop, run, load or close call
    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub step_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sync_settle: default_sync_settle(),
            sensor_settle: default_sensor_settle(),
            step_settle: default_step_settle(),
            rearm_delay: default_rearm_delay(),
            step_timeout: default_step_timeout(),
        }
    }
}

impl TimingConfig {
    /// All delays zero, default step timeout. Used for simulated hardware and tests.
    pub fn immediate() -> Self {
        Self {
            sync_settle: Duration::ZERO,
            sensor_settle: Duration::ZERO,
            step_settle: Duration::ZERO,
            rearm_delay: Duration::ZERO,
            step_timeout: default_step_timeout(),
        }
    }
}

/// Parameters of one measurement session.
///
/// Immutable once a session is built; everything derived per cycle lives in
/// [`crate::measurement::record::RunRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Experiment identifier, prefix of every run name and filename
    pub experiment_type: String,
    /// Number of dynamic sweep steps
    #[serde(default = "default_dynamic_steps")]
    pub dynamic_steps: usize,
    /// Acquisitions per sweep step
    pub averages: usize,
    /// Delay before every acquisition
    #[serde(default, with = "humantime_serde")]
    pub sleep: Duration,
    /// Protocol settle delays
    #[serde(default)]
    pub timing: TimingConfig,
    /// Sensor configuration block
    #[serde(default)]
    pub sensor: DeviceBlock,
    /// Static device configuration blocks, by device name
    #[serde(default)]
    pub static_devices: BTreeMap<String, DeviceBlock>,
    /// Dynamic device configuration blocks, by device name
    #[serde(default)]
    pub dynamic_devices: BTreeMap<String, DeviceBlock>,
}

impl RunParameters {
    /// Minimal parameters with default timing and empty device blocks.
    pub fn new(experiment_type: impl Into<String>, dynamic_steps: usize, averages: usize) -> Self {
        Self {
            experiment_type: experiment_type.into(),
            dynamic_steps,
            averages,
            sleep: Duration::ZERO,
            timing: TimingConfig::default(),
            sensor: DeviceBlock::new(),
            static_devices: BTreeMap::new(),
            dynamic_devices: BTreeMap::new(),
        }
    }

    /// Replace the timing block
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Validate the parameters. Must pass before any hardware is touched.
    pub fn validate(&self) -> AppResult<()> {
        let id = self.experiment_type.trim();
        if id.is_empty() {
            return Err(DaqError::Configuration(
                "experiment_type must not be empty".to_string(),
            ));
        }
        if id.len() != self.experiment_type.len() || id.contains(['/', '\\']) {
            return Err(DaqError::Configuration(format!(
                "experiment_type '{}' cannot be used in a filename",
                self.experiment_type
            )));
        }
        if self.averages == 0 {
            return Err(DaqError::Configuration(
                "averages must be at least 1".to_string(),
            ));
        }
        if self.dynamic_steps == 0 {
            return Err(DaqError::Configuration(
                "dynamic_steps must be at least 1".to_string(),
            ));
        }
        if self.timing.step_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "timing.step_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_dynamic_steps() -> usize {
    1
}

fn default_sync_settle() -> Duration {
    Duration::from_millis(100)
}

fn default_sensor_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_step_settle() -> Duration {
    Duration::from_millis(100)
}

fn default_rearm_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Settings {
    /// Environment prefix for overrides
    pub const ENV_PREFIX: &'static str = "SWEEP_DAQ_";

    /// Load configuration from a specific file path plus environment overrides
    ///
    /// Example override: `SWEEP_DAQ_RUN__AVERAGES=50`
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Load configuration from an in-memory TOML document
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Serialization(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.storage.csv_export && !cfg!(feature = "storage_csv") {
            return Err(DaqError::Configuration(
                "storage.csv_export requires the storage_csv feature".to_string(),
            ));
        }

        self.run.validate()
    }
}
