//! Logging setup for ktimerd.
//!
//! Logs go to stderr so stdout carries only protocol replies. Set
//! `DEBUG_LOGGING=1` to enable debug output for the ktimer crates.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub fn init() {
    let debug_logging = std::env::var("DEBUG_LOGGING").is_ok();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::NONE);

    let filter_directive = if debug_logging {
        "info,ktimer_core=debug,ktimer_cli=debug,ktimerd=debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(EnvFilter::new(filter_directive))
        .init();

    tracing::debug!(debug_logging, "ktimerd logging initialized");
}
