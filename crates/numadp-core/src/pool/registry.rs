//! # Pool Registry
//!
//! Owns one [`NodePool`] per NUMA node and drives the pool lifecycle:
//!
//! ```text
//! init ──► discover ──► bootstrap (all nodes) ──► commit ──► alloc* ──► destroy
//!                              │
//!                              └─ any node fails / timeout ──► rollback ──► Err
//! ```
//!
//! A registry is only observable after every node bootstrapped
//! successfully. Allocations borrow the registry, so `destroy` and the
//! reset operations (which take `&mut self`) cannot run while any
//! [`Allocation`] is alive.

use std::alloc::Layout;
use std::sync::Arc;

use crate::numa::{AffinityBinder, AffinityGuard, LinuxPlatform, NumaError, NumaPlatform, NumaTopology};

use super::bootstrap::bootstrap_all;
use super::node::{Allocation, NodePool, PoolStats};
use super::{prober, PoolConfig, PoolError};

/// The set of per-node pools, indexed by NUMA node ID.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: Vec<NodePool>,
    node_count: usize,
    per_node_size: usize,
    binder: AffinityBinder,
}

impl PoolRegistry {
    /// Bootstrap pools on every node of the host with the default config.
    ///
    /// The default sizing pins each node's entire reported memory. Unless
    /// `RLIMIT_MEMLOCK` stops it (a [`NumaError::PinFailed`] node failure),
    /// that locks and pre-faults all of RAM. Size pools explicitly through
    /// [`PoolRegistry::init_with`] in production.
    ///
    /// # Errors
    ///
    /// See [`PoolRegistry::init_with`].
    pub fn init() -> Result<Self, PoolError> {
        Self::init_with(Arc::new(LinuxPlatform::new()), PoolConfig::default())
    }

    /// Bootstrap pools on every node reported by `platform`.
    ///
    /// Nodes are bootstrapped in parallel; the registry is returned only
    /// if all of them succeed. On failure every pool built so far is
    /// unlocked and released before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidConfig`] if `config` fails validation
    /// - [`PoolError::NumaUnavailable`] if the platform has no NUMA support
    /// - [`PoolError::PartialInitFailure`] if any node failed
    /// - [`PoolError::InitTimeout`] if the bootstrap timeout elapsed
    pub fn init_with(
        platform: Arc<dyn NumaPlatform>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let plan = prober::discover(platform.as_ref(), config.sizing)?;
        let binder = AffinityBinder::new(Arc::clone(&platform), Arc::new(plan.topology.clone()));

        let pools = bootstrap_all(&platform, &binder, &plan, &config)?;

        tracing::info!(
            "Pool registry ready: {} nodes, {} bytes pinned",
            pools.len(),
            plan.total_size()
        );

        Ok(Self {
            node_count: pools.len(),
            per_node_size: plan.per_node_size,
            pools,
            binder,
        })
    }

    /// Unlock and release every pool.
    ///
    /// Safe to call repeatedly; on an empty registry it does nothing.
    pub fn destroy(&mut self) {
        if self.pools.is_empty() {
            return;
        }

        let released: usize = self.pools.iter().map(NodePool::capacity).sum();
        let count = self.pools.len();
        // Dropping each pool drops its region: unlock, then release.
        self.pools.clear();
        self.node_count = 0;
        self.per_node_size = 0;

        tracing::info!("Pool registry destroyed: {} nodes, {} bytes released", count, released);
    }

    /// Allocate `size` bytes aligned to `align` from `node`'s pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidNode`] if `node` has no pool,
    /// [`PoolError::InvalidAlignment`] if `align` is not a power of two,
    /// and [`PoolError::PoolExhausted`] if the request does not fit.
    #[inline]
    pub fn alloc(&self, node: usize, size: usize, align: usize) -> Result<Allocation<'_>, PoolError> {
        self.checked_pool(node)?.alloc(size, align)
    }

    /// Allocate room for `layout` from `node`'s pool.
    ///
    /// # Errors
    ///
    /// Same as [`PoolRegistry::alloc`].
    #[inline]
    pub fn alloc_layout(&self, node: usize, layout: Layout) -> Result<Allocation<'_>, PoolError> {
        self.alloc(node, layout.size(), layout.align())
    }

    /// Allocate from the pool of the node the calling thread runs on.
    ///
    /// Most useful after [`PoolRegistry::bind_to_node`].
    ///
    /// # Errors
    ///
    /// Same as [`PoolRegistry::alloc`].
    pub fn alloc_local(&self, size: usize, align: usize) -> Result<Allocation<'_>, PoolError> {
        self.alloc(self.binder.topology().current_node(), size, align)
    }

    /// Rewind one node's cursor, reclaiming all of its allocations.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidNode`] if `node` has no pool.
    pub fn reset_node(&mut self, node: usize) -> Result<(), PoolError> {
        let available = self.pools.len();
        let pool = self
            .pools
            .get_mut(node)
            .ok_or(PoolError::InvalidNode { node, available })?;
        pool.reset();
        tracing::debug!("Reset pool on node {}", node);
        Ok(())
    }

    /// Rewind every node's cursor.
    pub fn reset_all(&mut self) {
        for pool in &mut self.pools {
            pool.reset();
        }
        tracing::debug!("Reset {} node pools", self.pools.len());
    }

    /// Restrict the calling thread to the CPUs of `node`.
    ///
    /// Resolves `node` against the topology captured at `init`, not against
    /// the live pools, so it keeps working after [`PoolRegistry::destroy`].
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::InvalidNode`] for an unknown node and
    /// [`NumaError::AffinityBindFailed`] if binding is rejected.
    pub fn bind_to_node(&self, node: usize) -> Result<(), NumaError> {
        self.binder.bind_to_node(node)
    }

    /// Like [`PoolRegistry::bind_to_node`], restoring the previous CPU set
    /// when the guard drops.
    ///
    /// # Errors
    ///
    /// As [`PoolRegistry::bind_to_node`], plus [`NumaError::SyscallFailed`]
    /// if the current affinity cannot be read.
    pub fn bind_to_node_scoped(&self, node: usize) -> Result<AffinityGuard<'_>, NumaError> {
        self.binder.bind_to_node_scoped(node)
    }

    /// A binder for worker threads that outlive this borrow.
    #[must_use]
    pub fn binder(&self) -> &AffinityBinder {
        &self.binder
    }

    /// Number of node pools (zero after `destroy`).
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Smallest region size requested for any node (zero after `destroy`).
    #[inline]
    #[must_use]
    pub fn per_node_size(&self) -> usize {
        self.per_node_size
    }

    /// Whether the registry holds no pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// All pools, indexed by node ID.
    #[must_use]
    pub fn pools(&self) -> &[NodePool] {
        &self.pools
    }

    /// The pool for `node`, if any.
    #[must_use]
    pub fn pool(&self, node: usize) -> Option<&NodePool> {
        self.pools.get(node)
    }

    /// Topology snapshot taken at `init`.
    #[must_use]
    pub fn topology(&self) -> &NumaTopology {
        self.binder.topology()
    }

    /// Usage snapshot for every pool.
    #[must_use]
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(NodePool::stats).collect()
    }

    fn checked_pool(&self, node: usize) -> Result<&NodePool, PoolError> {
        self.pools.get(node).ok_or(PoolError::InvalidNode {
            node,
            available: self.pools.len(),
        })
    }
}

impl Drop for PoolRegistry {
    fn drop(&mut self) {
        self.destroy();
    }
}
