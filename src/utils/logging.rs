//! Structured logging initialization.
//!
//! Thin wrapper around `tracing-subscriber` driven by a
//! [`LoggingConfig`](crate::config::LoggingConfig). Applications that install
//! their own subscriber can skip this entirely; the engines only emit
//! `tracing` events and never require a subscriber.

use crate::config::LoggingConfig;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber from the given configuration.
///
/// Safe to call more than once; later calls are ignored if a subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("logging already initialized, keeping existing subscriber");
    }
}

/// Install a plain subscriber at the given level. Convenience for examples
/// and tests.
pub fn init_at(level: Level) {
    let config = LoggingConfig {
        log_level: level,
        ..LoggingConfig::default()
    };
    init(&config);
}
