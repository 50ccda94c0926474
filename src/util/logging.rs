//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// The `RUST_LOG` environment variable takes precedence over the
/// configured level.
pub fn init_logging(level: &str, format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Pretty => {
            registry.with(fmt::layer().pretty()).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Logging can only be initialized once per process, so init_logging
    // itself is exercised by the binary rather than here.
    #[test]
    fn test_log_format_variants() {
        assert_eq!(LogFormat::Json, LogFormat::Json);
        assert_ne!(LogFormat::Json, LogFormat::Pretty);
    }
}
