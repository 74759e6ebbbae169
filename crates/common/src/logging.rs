//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output layout for the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogStyle {
    /// Timestamp, level, target and thread name
    #[default]
    Full,
    /// Level and message only, for interactive CLI output
    Compact,
}

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    setup_logging_with(default_level, LogStyle::Full)
}

/// Setup tracing subscriber with an explicit output style
pub fn setup_logging_with(default_level: &str, style: LogStyle) -> crate::Result<()> {
    let filter = build_filter(default_level)?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match style {
        LogStyle::Full => registry
            .with(fmt::layer().with_thread_names(true))
            .try_init(),
        LogStyle::Compact => registry
            .with(fmt::layer().compact().without_time().with_target(false))
            .try_init(),
    };

    result.map_err(|e| crate::Error::Config(format!("Failed to install subscriber: {}", e)))
}

fn build_filter(default_level: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}
