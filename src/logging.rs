//! Tracing setup helpers for embedders and tests.
//!
//! The runtime itself only emits `tracing` events; installing a subscriber
//! is the embedder's call. These helpers cover the common case of an
//! `EnvFilter`-driven fmt subscriber honoring `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber at `info` unless `RUST_LOG` says otherwise.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_default("info");
}

/// Install a fmt subscriber with the given default directive when `RUST_LOG`
/// is unset.
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
