//! Smoke tests against the real host.
//!
//! Hosts without NUMA support or with a small memlock limit are expected
//! to fail cleanly, so these assert on the shape of the outcome rather
//! than on success.

#![cfg(target_os = "linux")]

mod common;

use std::sync::Arc;

use numadp_core::numa::NumaError;
use numadp_core::{LinuxPlatform, NumaPlatform, PoolConfig, PoolError, PoolRegistry};

#[test]
fn test_real_topology() {
    common::init_tracing();
    match LinuxPlatform::new().topology() {
        Ok(topology) => {
            assert!(topology.num_nodes() >= 1);
            assert!(!topology.summary().is_empty());
        }
        Err(e) => assert!(matches!(e, NumaError::NotAvailable | NumaError::TopologyError(_))),
    }
}

#[test]
fn test_real_bootstrap_small_pool() {
    common::init_tracing();
    let config = PoolConfig::builder().fixed_size(64 * 1024).build().unwrap();

    match PoolRegistry::init_with(Arc::new(LinuxPlatform::new()), config) {
        Ok(mut registry) => {
            assert!(registry.node_count() >= 1);
            let mut buf = registry.alloc(0, 4096, 64).unwrap();
            buf.as_mut_slice().fill(0x5A);
            assert_eq!(buf.as_slice()[4095], 0x5A);
            registry.destroy();
            assert!(registry.is_empty());
        }
        Err(
            PoolError::NumaUnavailable
            | PoolError::PartialInitFailure { .. }
            | PoolError::Numa(NumaError::TopologyError(_)),
        ) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
}
