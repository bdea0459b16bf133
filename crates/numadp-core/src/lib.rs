//! # numadp Core
//!
//! NUMA-aware pinned memory pools for kernel-bypass data planes.
//!
//! At startup one contiguous region is allocated on every NUMA node, locked
//! into physical memory and pre-faulted, so the packet path never takes a
//! page fault or touches remote memory. Workers then carve buffers out of
//! their node's pool with a lock-free bump allocator.
//!
//! This crate provides:
//! - **NUMA layer**: topology discovery, thread affinity, node-local mapping
//! - **Pools**: parallel all-or-nothing bootstrap, bump allocation, teardown
//! - **Testing**: a resource-accounting platform double
//!
//! ## Design Principles
//!
//! 1. **All or nothing** - a registry exists only if every node bootstrapped
//! 2. **No locks on the hot path** - allocation is a single CAS loop
//! 3. **Release exactly once** - regions unlock and unmap on drop
//!
//! ## Example
//!
//! ```rust,no_run
//! use numadp_core::{PoolConfig, PoolRegistry, LinuxPlatform};
//! use std::sync::Arc;
//!
//! let config = PoolConfig::builder().per_node_fraction(0.25).build()?;
//! let mut registry = PoolRegistry::init_with(Arc::new(LinuxPlatform::new()), config)?;
//!
//! let buf = registry.alloc(0, 2048, 64)?;
//! assert_eq!(buf.len(), 2048);
//!
//! registry.destroy();
//! # Ok::<(), numadp_core::Error>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod numa;
pub mod pool;
pub mod testing;

// Re-export key types
pub use numa::{AffinityBinder, AffinityGuard, LinuxPlatform, NumaError, NumaPlatform, NumaTopology};
pub use pool::{Allocation, NodePool, PoolConfig, PoolError, PoolRegistry, PoolSizing, PoolStats};

/// Result type for numadp-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for numadp-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Platform and per-node errors
    #[error("NUMA error: {0}")]
    Numa(#[from] numa::NumaError),

    /// Pool lifecycle and allocation errors
    #[error("Pool error: {0}")]
    Pool(#[from] pool::PoolError),
}
