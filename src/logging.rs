//! Logging setup shared by coordinator and worker processes.
//!
//! Both roles log to stderr. A worker's stdout carries protocol envelopes
//! and nothing else; its stderr is inherited by the coordinator, so worker
//! logs interleave with the coordinator's own.
//!
//! # Environment Variables
//!
//! - `RUNWORKER_LOG` - Log filter (overrides `RUST_LOG` and the configured level)
//! - `RUNWORKER_LOG_FORMAT` - Output format: compact, json
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Filter variable read by [`LogConfig::with_env_overrides`].
pub const LOG_ENV: &str = "RUNWORKER_LOG";

/// Format variable read by [`LogConfig::with_env_overrides`].
pub const LOG_FORMAT_ENV: &str = "RUNWORKER_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: compact, json",
                s
            )),
        }
    }
}

/// Logging configuration, passed to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Custom filter directive; wins over `level` when set.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take level and format from the `[logging]` settings section.
    ///
    /// An unknown level keeps the default.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            level: parse_level(&settings.level).unwrap_or(Level::INFO),
            format: settings.format,
            filter: None,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Apply `RUNWORKER_LOG`, `RUST_LOG` and `RUNWORKER_LOG_FORMAT`.
    ///
    /// A filter already set explicitly is kept.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            self.filter = std::env::var(LOG_ENV)
                .or_else(|_| std::env::var("RUST_LOG"))
                .ok();
        }

        if let Some(format) = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|f| f.parse().ok())
        {
            self.format = format;
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }
}

/// Parse a log level name.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Install the global subscriber, writing to stderr.
///
/// Later calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };

    // Already initialized (tests, or a host that set its own subscriber).
    let _ = result;
}
