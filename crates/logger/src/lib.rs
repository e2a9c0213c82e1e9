use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    initialize_tracing(LevelFilter::INFO);
}

/// Initialize with an explicit default level (overridable via RUST_LOG).
pub fn init_with_level(level: LevelFilter) {
    initialize_tracing(level);
}

/// Initialize tracing subscriber with default configuration.
///
/// `RUST_LOG_FORMAT=json` switches the output layer to JSON, anything
/// else keeps the compact human-readable layer.
fn initialize_tracing(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        "" => tracing_subscriber::fmt::layer().compact().with_filter(env_filter).boxed(),
        other => {
            let layer = tracing_subscriber::fmt::layer().compact().with_filter(env_filter).boxed();
            warn!("Unknown RUST_LOG_FORMAT {other:?}, falling back to compact");
            layer
        }
    };

    tracing_subscriber::registry().with(log_layer).init();
}
