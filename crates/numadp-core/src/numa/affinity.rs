//! # Worker Affinity Binding
//!
//! Pins the calling thread to the CPU set of a NUMA node so that its
//! execution is co-located with that node's memory pool. Pool bootstrap
//! workers and data-plane workers share this logic.
//!
//! Binding changes the affinity of the *calling* thread only. Threads that
//! are borrowed from a shared pool should use
//! [`AffinityBinder::bind_to_node_scoped`], which restores the previous CPU
//! set when the returned guard is dropped.

use std::marker::PhantomData;
use std::sync::Arc;

use super::{NumaError, NumaPlatform, NumaTopology};

/// Binds threads to the CPUs of a NUMA node.
///
/// Stateless apart from the topology snapshot it resolves nodes against;
/// cheap to clone and safe to call repeatedly from any thread.
#[derive(Debug, Clone)]
pub struct AffinityBinder {
    platform: Arc<dyn NumaPlatform>,
    topology: Arc<NumaTopology>,
}

impl AffinityBinder {
    /// Create a binder resolving nodes against `topology`.
    #[must_use]
    pub fn new(platform: Arc<dyn NumaPlatform>, topology: Arc<NumaTopology>) -> Self {
        Self { platform, topology }
    }

    /// The topology nodes are resolved against.
    #[must_use]
    pub fn topology(&self) -> &NumaTopology {
        &self.topology
    }

    /// Restrict the calling thread to the CPUs of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::InvalidNode`] for an unknown node, and
    /// [`NumaError::AffinityBindFailed`] if the node has no CPUs (sparse
    /// or CPU-less node) or the kernel rejects the CPU set.
    pub fn bind_to_node(&self, node: usize) -> Result<(), NumaError> {
        let available = self.topology.num_nodes();
        if node >= available {
            return Err(NumaError::InvalidNode { node, available });
        }

        let cpus = self.topology.cpus_for_node(node);
        if cpus.is_empty() {
            return Err(NumaError::AffinityBindFailed {
                node,
                reason: "node has no CPUs mapped".to_string(),
            });
        }

        self.platform
            .set_thread_affinity(cpus)
            .map_err(|e| NumaError::AffinityBindFailed {
                node,
                reason: format!("sched_setaffinity failed: {e}"),
            })?;

        tracing::debug!(
            "Bound thread {:?} to NUMA node {} ({} CPUs)",
            std::thread::current().name(),
            node,
            cpus.len()
        );
        Ok(())
    }

    /// Like [`bind_to_node`](Self::bind_to_node), but returns a guard that
    /// restores the thread's previous CPU set when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`bind_to_node`](Self::bind_to_node), plus
    /// [`NumaError::SyscallFailed`] if the current CPU set cannot be read.
    pub fn bind_to_node_scoped(&self, node: usize) -> Result<AffinityGuard<'_>, NumaError> {
        let previous = self.platform.thread_affinity()?;
        self.bind_to_node(node)?;
        Ok(AffinityGuard {
            platform: self.platform.as_ref(),
            previous,
            node,
            _not_send: PhantomData,
        })
    }
}

/// Restores a thread's CPU affinity on drop.
///
/// Tied to the thread that created it.
#[must_use = "dropping the guard immediately restores the previous affinity"]
#[derive(Debug)]
pub struct AffinityGuard<'a> {
    platform: &'a dyn NumaPlatform,
    previous: Vec<usize>,
    node: usize,
    _not_send: PhantomData<*const ()>,
}

impl AffinityGuard<'_> {
    /// The node the thread is bound to while the guard lives.
    #[must_use]
    pub fn node(&self) -> usize {
        self.node
    }

    /// The CPU set that will be restored.
    #[must_use]
    pub fn previous_cpus(&self) -> &[usize] {
        &self.previous
    }
}

impl Drop for AffinityGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.platform.set_thread_affinity(&self.previous) {
            tracing::warn!(
                "Failed to restore CPU affinity after binding to node {}: {}",
                self.node,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::AccountingPlatform;

    fn binder(platform: &Arc<AccountingPlatform>) -> AffinityBinder {
        let topology = Arc::new(platform.topology().unwrap());
        AffinityBinder::new(Arc::clone(platform) as Arc<dyn NumaPlatform>, topology)
    }

    #[test]
    fn test_bind_to_node() {
        let platform = Arc::new(AccountingPlatform::uniform(2, 1 << 20));
        let binder = binder(&platform);

        binder.bind_to_node(1).unwrap();
        assert_eq!(platform.thread_affinity().unwrap(), platform.cpus_of(1));
    }

    #[test]
    fn test_bind_invalid_node() {
        let platform = Arc::new(AccountingPlatform::uniform(2, 1 << 20));
        let err = binder(&platform).bind_to_node(5).unwrap_err();
        assert!(matches!(
            err,
            NumaError::InvalidNode {
                node: 5,
                available: 2
            }
        ));
    }

    #[test]
    fn test_bind_cpuless_node() {
        let platform = Arc::new(AccountingPlatform::with_nodes(
            vec![vec![0, 1], vec![]],
            vec![1 << 20, 1 << 20],
        ));
        let err = binder(&platform).bind_to_node(1).unwrap_err();
        assert!(matches!(err, NumaError::AffinityBindFailed { node: 1, .. }));
    }

    #[test]
    fn test_bind_rejected_by_kernel() {
        let platform = Arc::new(AccountingPlatform::uniform(2, 1 << 20));
        platform.fail_affinity_on(0);
        let err = binder(&platform).bind_to_node(0).unwrap_err();
        assert!(matches!(err, NumaError::AffinityBindFailed { node: 0, .. }));
    }

    #[test]
    fn test_scoped_bind_restores_previous() {
        let platform = Arc::new(AccountingPlatform::uniform(2, 1 << 20));
        let binder = binder(&platform);
        let before = platform.thread_affinity().unwrap();

        {
            let guard = binder.bind_to_node_scoped(1).unwrap();
            assert_eq!(guard.node(), 1);
            assert_eq!(guard.previous_cpus(), before.as_slice());
            assert_eq!(platform.thread_affinity().unwrap(), platform.cpus_of(1));
        }

        assert_eq!(platform.thread_affinity().unwrap(), before);
    }

    #[test]
    fn test_bind_is_repeatable() {
        let platform = Arc::new(AccountingPlatform::uniform(2, 1 << 20));
        let binder = binder(&platform);
        for _ in 0..3 {
            binder.bind_to_node(0).unwrap();
            binder.bind_to_node(1).unwrap();
        }
        assert_eq!(platform.thread_affinity().unwrap(), platform.cpus_of(1));
    }
}
