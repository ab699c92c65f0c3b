//! Structured logging setup.
//!
//! Logs go to stderr through `tracing-subscriber`, leaving stdout for
//! command output. `RUST_LOG` takes precedence over `[logging].level`.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber. Call once, from `main`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid logging.level: '{}'", config.level))?,
    };

    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .try_init()?,
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?,
    }
    Ok(())
}
