//! Standardized `tracing` setup for binaries embedding the tickline
//! workspace: a human-readable default and a JSON variant for log
//! aggregators. `RUST_LOG` controls levels as usual (e.g.
//! `RUST_LOG=tickline_broker=debug`).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Installs a human-readable `tracing` subscriber reading `RUST_LOG`.
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Installs a JSON-formatted `tracing` subscriber, for shipping logs to an
/// aggregator rather than a terminal.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init();
}
