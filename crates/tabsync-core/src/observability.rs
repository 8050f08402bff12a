//! Observability infrastructure for tabsync.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialization and the span constructors used by the engine
//! and the CLI.

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}' (expected json or pretty)"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `tabsync_engine=debug`)
///
/// # Example
///
/// ```rust
/// use tabsync_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Creates a span covering one sync run.
///
/// # Example
///
/// ```rust
/// use tabsync_core::observability::run_span;
///
/// let span = run_span("01HZY3J5Q6W0M8P3N2R4T6V8X0", "schedule");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn run_span(run_id: &str, trigger: &str) -> Span {
    tracing::info_span!("sync_run", run_id = run_id, trigger = trigger)
}

/// Creates a span covering one destination group within a run.
#[must_use]
pub fn group_span(destination: &str, sheet: &str) -> Span {
    tracing::info_span!("destination_group", destination = destination, sheet = sheet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json); // no-op
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = run_span("run_123", "manual");
        let _guard = span.enter();
        let inner = group_span("doc-1", "Combined_Data");
        let _inner = inner.enter();
        tracing::info!("message in spans");
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().expect("json"), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().expect("text"), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
