//! # Logging & Tracing Infrastructure
//!
//! Provides structured logging with the `tracing` crate, supporting:
//! - JSON, pretty-print and compact output formats
//! - Module-level filtering
//! - Redaction helpers for tokens, passwords and emails
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Pretty)
//!     .with_level(LogLevel::Debug);
//!
//! init_logging(config)?;
//! tracing::info!("API layer ready");
//! ```

use crate::error::{Error, Result};
use bridge_traits::time::LogLevel;
use std::io;
use tracing_subscriber::{
    filter::EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
    Layer, Registry,
};

const REDACTED: &str = "[REDACTED]";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact single-line format
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Minimum log level for workspace crates
    pub level: LogLevel,
    /// Custom filter string (e.g., "core_api=debug,core_sync=trace")
    pub filter: Option<String>,
    /// Emit span open/close events
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Initialize the logging system
///
/// Call once during application startup. Subsequent calls return
/// [`Error::Logging`] because a global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let fmt_layer = build_fmt_layer(&config);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter_string = match &config.filter {
        Some(custom_filter) => custom_filter.clone(),
        None => {
            // Our crates at the configured level, chatty dependencies at warn
            let level = config.level.as_str();
            [
                "core_runtime",
                "core_auth",
                "core_api",
                "core_sync",
                "core_service",
                "bridge_desktop",
            ]
            .iter()
            .map(|krate| format!("{}={}", krate, level))
            .chain(
                ["h2", "hyper", "reqwest", "sqlx"]
                    .iter()
                    .map(|krate| format!("{}=warn", krate)),
            )
            .collect::<Vec<_>>()
            .join(",")
        }
    };

    EnvFilter::try_new(filter_string)
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

fn build_fmt_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => layer.pretty().with_span_events(span_events).boxed(),
        LogFormat::Compact => layer.compact().with_span_events(span_events).boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
    }
}

/// Redact a field value if its name suggests a secret.
///
/// Emails keep their first character only.
///
/// ```ignore
/// use core_runtime::logging::redact_if_sensitive;
///
/// tracing::debug!(header = %redact_if_sensitive("Authorization", value), "Outgoing header");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const SENSITIVE_FIELDS: &[&str] = &[
        "token",
        "password",
        "secret",
        "api_key",
        "authorization",
        "bearer",
        "otp",
        "mfa_code",
    ];

    let field_lower = field_name.to_lowercase();
    if SENSITIVE_FIELDS.iter().any(|&f| field_lower.contains(f)) {
        return REDACTED.to_string();
    }

    match value.find('@') {
        Some(at_pos) if value[at_pos..].contains('.') => {
            let first = value.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, REDACTED)
        }
        _ => value.to_string(),
    }
}
