//! One-time tracing setup for binaries and tests.
//!
//! The library itself only emits events; it never installs a subscriber.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_level`.
/// Later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
