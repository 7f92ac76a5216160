//! Process-wide tracing setup (spec §6 ambient logging).
//!
//! Grounded on `estuary-flow/crates/dekaf/src/logging.rs::install()`: a
//! `tracing_subscriber::registry()` combined with an `EnvFilter`-driven
//! `fmt` layer writing to stderr. Dekaf additionally forwards per-task
//! logs to a journal sink via a `DynFilterFn` layer keyed off task-local
//! state; this core has no per-task journal to forward to, so only the
//! plain stderr layer is carried over.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber. Call once, at the top of
/// `main`, before any other code logs.
pub fn install() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
