//! # NUMA Node Pools
//!
//! Pinned, node-local memory pools with a lock-free bump allocator.
//!
//! ## Lifecycle
//!
//! 1. [`discover`] reads the topology and sizes one region per node
//! 2. [`bootstrap_node`] runs on a worker bound to each node, mapping,
//!    locking and pre-faulting that node's region
//! 3. [`PoolRegistry`] commits the pools only if every node succeeded
//! 4. [`PoolRegistry::alloc`] carves aligned slices from a node's pool
//! 5. [`PoolRegistry::destroy`] unlocks and releases every region
//!
//! ## Example
//!
//! ```rust,no_run
//! use numadp_core::pool::PoolRegistry;
//!
//! let registry = PoolRegistry::init()?;
//! registry.bind_to_node(0)?;
//! let mut buf = registry.alloc(0, 4096, 64)?;
//! buf.as_mut_slice().fill(0xAB);
//! # Ok::<(), numadp_core::Error>(())
//! ```

mod bootstrap;
mod config;
mod error;
mod node;
mod prober;
mod region;
mod registry;

pub use bootstrap::bootstrap_node;
pub use config::{PoolConfig, PoolConfigBuilder, PoolSizing};
pub use error::{NodeFailure, NodeFailures, PoolError};
pub use node::{align_up, Allocation, NodePool, PoolStats};
pub use prober::{discover, PoolPlan};
pub use region::PinnedRegion;
pub use registry::PoolRegistry;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
