//! `tracing` subscriber setup for the collector binary.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Fallback filter variable, consulted when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "RSSI_COLLECTOR_LOG_LEVEL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Multi-line human-readable output.
    #[default]
    Pretty,

    /// One line per event, no colours. Suits journald.
    Compact,

    /// Newline-delimited JSON.
    Json,
}

fn env_filter() -> anyhow::Result<EnvFilter> {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());

    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?)
}

/// Installs the global subscriber. Fails if the filter does not parse or a
/// subscriber is already installed.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter()?);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Pretty => registry.with(layer.pretty()).try_init()?,
        LogFormat::Compact => registry.with(layer.compact().with_ansi(false)).try_init()?,
        LogFormat::Json => registry
            .with(layer.json().with_current_span(false))
            .try_init()?,
    }

    Ok(())
}
