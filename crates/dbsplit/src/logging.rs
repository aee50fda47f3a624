//! Structured logging for dbsplit.
//!
//! The library only emits `tracing` events; applications that have no
//! subscriber of their own can install one here. Filtering is controlled by
//! the `DBSPLIT_LOG` environment variable.
//!
//! # Environment Variables
//!
//! - `DBSPLIT_LOG=info` - Default log level (info)
//! - `DBSPLIT_LOG=debug` - Shard resolution, fan-out and partition merges
//! - `DBSPLIT_LOG=dbsplit_sharding=trace` - Module-specific logging
//! - `DBSPLIT_LOG=warn,dbsplit_partition=debug` - Combined filters
//!
//! # Example
//!
//! ```ignore
//! use dbsplit::logging;
//!
//! // Initialize logging (call once at startup)
//! logging::init();
//!
//! // Or with a custom default level
//! logging::init_with_default("debug");
//! ```

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

const ENV_FILTER: &str = "DBSPLIT_LOG";

/// Initializes the global tracing subscriber with default settings.
///
/// Default level is `info` if `DBSPLIT_LOG` is not set. Subsequent calls
/// are ignored (tracing only allows one subscriber).
pub fn init() {
    init_with_default("info");
}

/// Initializes the global tracing subscriber with a custom default level.
pub fn init_with_default(default_level: &str) {
    let filter = EnvFilter::try_from_env(ENV_FILTER).unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let _ = subscriber.try_init();
}

/// Initializes logging with JSON output, for log aggregators.
pub fn init_json() {
    init_json_with_default("info");
}

fn init_json_with_default(default_level: &str) {
    let filter = EnvFilter::try_from_env(ENV_FILTER).unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = fmt().with_env_filter(filter).with_target(true).json();

    let _ = subscriber.try_init();
}

/// Initializes logging from the `[logging]` section of the configuration.
pub fn init_from_config(config: &LoggingConfig) {
    if config.json {
        init_json_with_default(&config.level);
    } else {
        init_with_default(&config.level);
    }
}
