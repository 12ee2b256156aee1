//! Tracing subscriber setup.

use crate::config::LogSettings;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG` when set, from `level` otherwise.
pub fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {e}", EnvFilter::DEFAULT_ENV));
    }
    EnvFilter::try_new(level).map_err(|e| anyhow::anyhow!("Invalid log level '{level}': {e}"))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&settings.level)?)
        .with_ansi(settings.ansi);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}
