//! Init / rollback / destroy behavior of the pool registry.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use numadp_core::numa::NumaError;
use numadp_core::testing::AccountingPlatform;
use numadp_core::{PoolConfig, PoolError, PoolRegistry, PoolSizing};

#[test]
fn test_init_one_pool_per_node() {
    let (platform, registry) = common::registry(4, 1 << 20);

    assert_eq!(registry.node_count(), 4);
    assert_eq!(registry.pools().len(), 4);
    for (node, pool) in registry.pools().iter().enumerate() {
        assert_eq!(pool.node_id(), node);
        assert_eq!(pool.used(), 0);
        assert!(!pool.base().as_ptr().is_null());
    }
    assert_eq!(platform.live_nodes(), vec![0, 1, 2, 3]);
    assert_eq!(platform.locked_bytes(), 4 << 20);
}

#[test]
fn test_numa_unavailable_is_fatal() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::unavailable());
    let err = PoolRegistry::init_with(platform.clone(), PoolConfig::default()).unwrap_err();
    assert!(matches!(err, PoolError::NumaUnavailable));
    assert_eq!(platform.counts().allocs, 0);
}

#[test]
fn test_alloc_failure_rolls_back_every_node() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::uniform(4, 1 << 20));
    platform.fail_alloc_on(3);

    let err = PoolRegistry::init_with(platform.clone(), PoolConfig::default()).unwrap_err();
    match &err {
        PoolError::PartialInitFailure {
            failures,
            node_count,
        } => {
            assert_eq!(*node_count, 4);
            assert_eq!(failures.nodes(), vec![3]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("node 3"));

    let counts = platform.counts();
    assert_eq!(counts.allocs, 3);
    assert!(counts.is_balanced());
    assert_eq!(platform.live_regions(), 0);
}

#[test]
fn test_every_failure_is_reported() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::uniform(4, 1 << 20));
    platform.fail_affinity_on(0);
    platform.fail_lock_on(2);

    let err = PoolRegistry::init_with(platform.clone(), PoolConfig::default()).unwrap_err();
    let PoolError::PartialInitFailure { failures, .. } = err else {
        panic!("expected partial init failure");
    };
    assert_eq!(failures.nodes(), vec![0, 2]);

    let causes: Vec<&NumaError> = failures.iter().map(|f| &f.cause).collect();
    assert!(matches!(causes[0], NumaError::AffinityBindFailed { node: 0, .. }));
    assert!(matches!(causes[1], NumaError::PinFailed { node: 2, .. }));

    assert!(platform.counts().is_balanced());
    assert_eq!(platform.live_regions(), 0);
}

#[test]
fn test_cpuless_node_fails_bootstrap() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::with_nodes(
        vec![vec![0, 1], vec![]],
        vec![1 << 20, 1 << 20],
    ));

    let err = PoolRegistry::init_with(platform.clone(), PoolConfig::default()).unwrap_err();
    let PoolError::PartialInitFailure { failures, .. } = err else {
        panic!("expected partial init failure");
    };
    assert_eq!(failures.nodes(), vec![1]);
    assert!(failures.to_string().contains("no CPUs"));
    assert_eq!(platform.live_regions(), 0);
}

#[test]
fn test_memoryless_node_fails_bootstrap() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::with_nodes(
        vec![vec![0], vec![1]],
        vec![1 << 20, 0],
    ));

    let err = PoolRegistry::init_with(platform.clone(), PoolConfig::default()).unwrap_err();
    let PoolError::PartialInitFailure { failures, .. } = err else {
        panic!("expected partial init failure");
    };
    assert!(matches!(
        failures.iter().next().map(|f| &f.cause),
        Some(NumaError::NodeAllocFailed { node: 1, .. })
    ));
    assert!(platform.counts().is_balanced());
}

#[test]
fn test_timeout_leaves_nothing_allocated() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::uniform(3, 1 << 20));
    platform.stall_alloc_on(2, Duration::from_millis(250));
    let config = PoolConfig::builder()
        .fixed_size(256 * 1024)
        .bootstrap_timeout(Duration::from_millis(40))
        .build()
        .unwrap();

    let err = PoolRegistry::init_with(platform.clone(), config).unwrap_err();
    match err {
        PoolError::InitTimeout { timeout, pending } => {
            assert_eq!(timeout, Duration::from_millis(40));
            assert_eq!(pending, vec![2]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let counts = platform.counts();
        if counts.allocs == 3 && counts.is_balanced() {
            break;
        }
        assert!(Instant::now() < deadline, "late region leaked: {counts:?}");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(platform.live_regions(), 0);
}

#[test]
fn test_timeout_not_hit_when_fast() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::uniform(2, 1 << 20));
    let config = PoolConfig::builder()
        .bootstrap_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let registry = PoolRegistry::init_with(platform, config).unwrap();
    assert_eq!(registry.node_count(), 2);
}

#[test]
fn test_destroy_twice_releases_once() {
    let (platform, mut registry) = common::registry(2, 1 << 20);

    registry.destroy();
    let after_first = platform.counts();
    assert_eq!(after_first.releases, 2);
    assert_eq!(after_first.unlocks, 2);
    assert!(after_first.is_balanced());

    registry.destroy();
    assert_eq!(platform.counts(), after_first);
    assert_eq!(registry.node_count(), 0);
    assert_eq!(registry.per_node_size(), 0);

    drop(registry);
    assert_eq!(platform.counts(), after_first);
}

#[test]
fn test_fraction_sizing() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::with_nodes(
        vec![vec![0], vec![1]],
        vec![8 << 20, 4 << 20],
    ));
    let config = PoolConfig::builder()
        .sizing(PoolSizing::PerNode { fraction: 0.5 })
        .build()
        .unwrap();

    let registry = PoolRegistry::init_with(platform, config).unwrap();
    assert_eq!(registry.pool(0).unwrap().capacity(), 4 << 20);
    assert_eq!(registry.pool(1).unwrap().capacity(), 2 << 20);
    assert_eq!(registry.per_node_size(), 2 << 20);
}

#[test]
fn test_bootstrap_workers_are_named() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::uniform(1, 1 << 20));
    let config = PoolConfig::builder()
        .thread_name_prefix("pool-init")
        .build()
        .unwrap();
    let registry = PoolRegistry::init_with(platform.clone(), config).unwrap();
    assert_eq!(registry.node_count(), 1);
    assert_eq!(
        platform.alloc_threads(),
        vec![(0, Some("pool-init-0".to_string()))]
    );
}

#[test]
fn test_nul_in_thread_prefix_is_rejected() {
    common::init_tracing();
    let platform = Arc::new(AccountingPlatform::uniform(2, 1 << 20));
    let config = PoolConfig {
        thread_name_prefix: "boot\0x".to_string(),
        ..PoolConfig::default()
    };

    let err = PoolRegistry::init_with(platform.clone(), config).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
    assert_eq!(platform.counts().allocs, 0);
}
