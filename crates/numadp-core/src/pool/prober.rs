//! # Topology Prober
//!
//! Turns the platform's NUMA topology and a [`PoolSizing`] policy into a
//! [`PoolPlan`]: how many pools to build and how large each one is.

use crate::numa::{NumaError, NumaPlatform, NumaTopology};

use super::{PoolError, PoolSizing};

/// Result of topology discovery: one requested region size per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPlan {
    /// Topology the plan was derived from
    pub topology: NumaTopology,
    /// Requested region size per node (index = node ID)
    pub node_sizes: Vec<usize>,
    /// Size every node is asked for at minimum
    pub per_node_size: usize,
}

impl PoolPlan {
    /// Number of pools to build.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_sizes.len()
    }

    /// Total bytes requested across all nodes.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.node_sizes.iter().sum()
    }
}

/// Query the topology and size each node's pool.
///
/// Sizes derived from a memory fraction are rounded down to whole pages.
/// A node reporting no memory gets a zero size and fails at allocation.
///
/// # Errors
///
/// Returns [`PoolError::NumaUnavailable`] if the platform has no NUMA
/// support, or [`PoolError::Numa`] if the topology cannot be read.
pub fn discover(platform: &dyn NumaPlatform, sizing: PoolSizing) -> Result<PoolPlan, PoolError> {
    let topology = platform.topology().map_err(|e| match e {
        NumaError::NotAvailable => PoolError::NumaUnavailable,
        other => PoolError::Numa(other),
    })?;
    topology.log_topology();

    let page = platform.page_size().max(1);
    let node_count = topology.num_nodes();

    let node_sizes: Vec<usize> = match sizing {
        PoolSizing::PerNode { fraction } => (0..node_count)
            .map(|node| fraction_of(topology.memory_for_node(node), fraction, page))
            .collect(),
        PoolSizing::Representative { fraction } => {
            vec![fraction_of(topology.memory_for_node(0), fraction, page); node_count]
        }
        PoolSizing::Fixed(bytes) => vec![bytes; node_count],
    };
    let per_node_size = node_sizes.iter().copied().min().unwrap_or(0);

    tracing::info!(
        "Pool plan: {} nodes, {:?} sizing, {} bytes minimum per node",
        node_count,
        sizing,
        per_node_size
    );

    Ok(PoolPlan {
        topology,
        node_sizes,
        per_node_size,
    })
}

/// `fraction` of `memory`, rounded down to a multiple of `page`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fraction_of(memory: u64, fraction: f64, page: usize) -> usize {
    let target = (memory as f64 * fraction) as usize;
    target - target % page
}
