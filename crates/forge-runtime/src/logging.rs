//! Tracing setup for the runtime daemon.
//!
//! Trimmed from the rotation/file-appender machinery a long-lived
//! service would carry: this daemon is expected to run under a
//! process supervisor that captures stdout, so logging only needs an
//! `EnvFilter` plus a choice of human or machine-readable formatting.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format for the stdout log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for local development.
    Pretty,
    /// One JSON object per line, for ingestion by a log pipeline.
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("FORGE_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initializes the global tracing subscriber. Idempotent within a
/// process: a second call is a no-op rather than a panic, so tests that
/// share a process can call it freely.
pub fn init() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let format = LogFormat::from_env();
    let result = match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_env_defaults_to_pretty() {
        std::env::remove_var("FORGE_LOG_FORMAT");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
    }

    #[test]
    fn format_from_env_reads_json() {
        std::env::set_var("FORGE_LOG_FORMAT", "json");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);
        std::env::remove_var("FORGE_LOG_FORMAT");
    }
}
