//! Logging setup and span helpers.
//!
//! Every component logs through `tracing` with structured fields; this module
//! owns subscriber initialization and the spans shared by dump, restore and
//! retention code paths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Human-readable logs (for interactive use).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::Config(format!(
                "unknown log format '{other}' (expected pretty or json)"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. `RUST_LOG`
/// controls levels and defaults to `info`. Logs go to stderr so that
/// command output on stdout stays machine-readable.
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
                    .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Creates a span for an operation on one dump.
///
/// # Example
///
/// ```rust
/// use shroud_core::observability::dump_span;
///
/// let span = dump_span("dump", "01HZX3K9R8ZQ4W5T6Y7U8I9O0P");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn dump_span(operation: &str, dump_id: &str) -> Span {
    tracing::info_span!("dump", op = operation, dump_id = dump_id)
}

/// Creates a span for a single task execution.
///
/// `meta` is the task's descriptive metadata (schema, table, ...), recorded
/// as one field.
#[must_use]
pub fn task_span(operation: &str, task: &str, meta: &BTreeMap<String, String>) -> Span {
    tracing::info_span!("task", op = operation, task = task, meta = ?meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_spans_enter() {
        let span = dump_span("delete", "d1");
        let _guard = span.enter();
        let meta = BTreeMap::from([("table".to_string(), "users".to_string())]);
        let inner = task_span("dump", "table___public.users", &meta);
        let _inner = inner.enter();
        tracing::info!("inside task span");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().expect("json"), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().expect("text"), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
