//! Tracing Infrastructure
//!
//! Structured, async-aware logging for measurement sessions, built on the
//! `tracing` and `tracing-subscriber` crates. Sessions log inside a `session`
//! span carrying the session id and experiment; cycle events carry `run`,
//! `step`, `state` and `operation` fields.
//!
//! `RUST_LOG` wins over the configured level.
//!
//! # Example
//! ```no_run
//! use sweep_daq::{config::Settings, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load_from("config/measurement.toml")?;
//! logging::init_from_config(&settings.logging)?;
//! info!(experiment = %settings.run.experiment_type, "Session configured");
//! # Ok(())
//! # }
//! ```

use crate::config::LoggingConfig;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (interactive sessions at the terminal)
    Pretty,
    /// Single line per event, no colors
    Compact,
    /// One JSON object per event, for log shipping
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Emit an event when a session span opens and closes
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// ANSI colors (Pretty only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Options from the `[logging]` section
    pub fn from_logging_config(config: &LoggingConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.level)?,
            format: config.format.parse()?,
            ..Default::default()
        })
    }

    /// Defaults at `level`
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span open/close events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    fn fmt_layer(&self) -> BoxedLayer {
        let span_events = if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(self.with_file_and_line)
            .with_line_number(self.with_file_and_line);

        match self.format {
            OutputFormat::Pretty => layer.pretty().with_ansi(self.with_ansi).boxed(),
            OutputFormat::Compact => layer.compact().with_ansi(false).boxed(),
            OutputFormat::Json => layer.json().boxed(),
        }
    }
}

/// Initialize tracing from the `[logging]` section.
pub fn init_from_config(config: &LoggingConfig) -> Result<(), String> {
    init(TracingConfig::from_logging_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, so tests and several entry points can share one process.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    if let Err(e) = tracing_subscriber::registry()
        .with(config.fmt_layer().with_filter(env_filter))
        .try_init()
    {
        tracing::debug!(error = %e, "Tracing already initialized");
    }
    Ok(())
}

/// Parse a level name (case-insensitive)
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    Level::from_str(level).map_err(|_| {
        format!("Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error")
    })
}
