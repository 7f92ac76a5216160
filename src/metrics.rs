//! Prometheus metrics endpoint (spec §6 ambient observability, C13).
//!
//! Grounded on `estuary-flow/crates/dekaf/src/metrics_server.rs::build_router()`:
//! a `PrometheusBuilder`-installed recorder rendered behind a tiny `axum`
//! router under a `TraceLayer`. Dekaf additionally samples jemalloc heap
//! stats into gauges before rendering; this core has no custom allocator
//! wired in, so that step is dropped and only the recorder/render path is
//! kept.

use std::sync::Arc;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::trace::TraceLayer;

use crate::pools::WorkerPoolRouter;
use crate::vault::SecretVault;

/// Counter/gauge names emitted by this core, collected here so call
/// sites never hand-type a metric name twice.
pub mod names {
    pub const AUTH_ATTEMPTS: &str = "salt_master_auth_attempts_total";
    pub const AUTH_ACCEPTS: &str = "salt_master_auth_accepts_total";
    pub const AUTH_REJECTS: &str = "salt_master_auth_rejects_total";
    pub const POOL_DISPATCHES: &str = "salt_master_pool_dispatches_total";
    pub const PUBLISH_SERIAL: &str = "salt_master_publish_serial";
    pub const PRESENT_MINIONS: &str = "salt_master_present_minions";
    pub const REJECTED_CONNECTIONS: &str = "salt_master_rejected_connections_total";
    pub const ACTIVE_CONNECTIONS: &str = "salt_master_active_connections";
}

/// Installs the global Prometheus recorder. Call once, before any
/// `metrics::` macro use and before [`build_router`].
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install the Prometheus recorder")
}

/// Refreshes the gauges that mirror another component's own internal
/// counters (the pool router's dispatch counts, the vault's publish
/// serial) rather than being updated incrementally at each call site.
/// Invoked just before every `/metrics` scrape.
pub fn sample(pools: &WorkerPoolRouter, vault: &SecretVault) {
    for pool_name in pools.pools().keys() {
        metrics::gauge!(names::POOL_DISPATCHES, "pool" => pool_name.clone())
            .set(pools.counter(pool_name) as f64);
    }
    metrics::gauge!(names::PUBLISH_SERIAL).set(vault.current_serial() as f64);
}

/// Builds the `/metrics` router. `pools`/`vault` are sampled into gauges
/// on every scrape so the exported counters always reflect current state
/// rather than the value at startup.
pub fn build_router(handle: PrometheusHandle, pools: Arc<WorkerPoolRouter>, vault: Arc<SecretVault>) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                let pools = pools.clone();
                let vault = vault.clone();
                async move {
                    sample(&pools, &vault);
                    handle.render()
                }
            }),
        )
        .layer(TraceLayer::new_for_http())
}
