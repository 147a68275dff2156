//! Structured logging setup for the demo binary. The library core only
//! ever calls into `tracing` macros; it never initializes a subscriber
//! itself, leaving that decision to whatever links it in.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "info";

/// Installs a global `tracing` subscriber honoring `RUST_LOG`, falling back
/// to [`DEFAULT_FILTER`] when unset or invalid.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let _ = Registry::default().with(env_filter).with(fmt_layer).try_init();
}
