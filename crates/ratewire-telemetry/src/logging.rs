//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use ratewire_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global fmt subscriber described by `config`.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    if config.json {
        builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))
    }
}
