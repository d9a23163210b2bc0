//! Tracing subscriber setup for the binary. The library only emits events.

use crate::error::{NormalizeError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// timestamp LEVEL target: message fields
    #[default]
    #[value(alias = "text")]
    Compact,
    /// One JSON object per event
    #[value(alias = "jsonl")]
    Json,
}

/// `RUST_LOG` wins over `level` when set
fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| NormalizeError::Config(format!("invalid log filter '{}': {}", level, e)))
}

/// Install the global subscriber, writing to stderr
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let filter = build_env_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|e| NormalizeError::Config(format!("logging already initialized: {}", e)))
}
