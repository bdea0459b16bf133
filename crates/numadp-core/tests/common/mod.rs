//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use numadp_core::testing::AccountingPlatform;
use numadp_core::{PoolConfig, PoolRegistry};

/// Route `tracing` output through the test harness once per binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("numadp_core=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A registry over `nodes` simulated nodes of `bytes` each.
pub fn registry(nodes: usize, bytes: u64) -> (Arc<AccountingPlatform>, PoolRegistry) {
    init_tracing();
    let platform = Arc::new(AccountingPlatform::uniform(nodes, bytes));
    let registry = PoolRegistry::init_with(platform.clone(), PoolConfig::default())
        .expect("bootstrap on accounting platform");
    (platform, registry)
}
