//! Logging setup.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
pub fn build_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("Invalid observability.log_level {:?}", config.log_level))
}

/// Install the global subscriber. Logs go to stderr so interactive output on
/// stdout stays clean.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(build_filter(config)?)
        .with_writer(std::io::stderr);

    let installed = if config.log_format == "compact" {
        tracing::subscriber::set_global_default(builder.compact().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("Failed to install tracing subscriber")
}
