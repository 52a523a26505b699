//! # relay-logging
//!
//! `tracing` subscriber setup for the relay binary and tests.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level. Output is either human-readable or JSON lines with span context.
//! Handlers attach `conn_id`, `session_id` and `msg_type` as structured
//! fields.

#![deny(unsafe_code)]

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// How to format and filter log output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info` or
    /// `info,relay_core=debug`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the event target (module path).
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

/// Logging setup failures.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The level/directive string did not parse.
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),
    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Build the filter: `rust_log` wins when present and non-empty.
pub fn build_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match rust_log.filter(|v| !v.trim().is_empty()) {
        Some(directives) => Ok(EnvFilter::try_new(directives)?),
        None => Ok(EnvFilter::try_new(level)?),
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&config.level, rust_log.as_deref())?;

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
        assert!(config.with_target);
    }

    #[test]
    fn configured_level_used_without_rust_log() {
        let filter = build_filter("debug", None).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn rust_log_wins() {
        let filter = build_filter("info", Some("relay_core=trace")).unwrap();
        assert_eq!(filter.to_string(), "relay_core=trace");
    }

    #[test]
    fn blank_rust_log_is_ignored() {
        let filter = build_filter("warn", Some("  ")).unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn invalid_level_is_an_error() {
        assert_matches!(
            build_filter("relay=notalevel", None),
            Err(LoggingError::InvalidFilter(_))
        );
    }

    #[test]
    fn second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert_matches!(init_logging(&config), Err(LoggingError::AlreadyInitialized(_)));
    }
}
