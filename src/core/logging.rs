//! `tracing` subscriber bootstrap.

use crate::core::config::LoggingConfig;
use crate::core::{PipelineError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Build the filter: `RUST_LOG` wins, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Install the global subscriber with an optional extra layer (for example
/// the pipeline's `tracing` bridge). Console output goes to stderr so it never
/// mixes with items written by the console exporter.
pub fn init_with<L>(config: &LoggingConfig, extra: Option<L>) -> Result<()>
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let fmt_layer = if config.structured {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .compact()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .compact()
    };

    tracing_subscriber::registry()
        .with(extra)
        .with(fmt_layer.with_filter(env_filter(config)))
        .try_init()
        .map_err(|e| PipelineError::config(format!("Failed to initialize logging: {}", e)))
}

/// Install the global subscriber with the console formatter only.
pub fn init(config: &LoggingConfig) -> Result<()> {
    init_with::<tracing_subscriber::layer::Identity>(config, None)
}
