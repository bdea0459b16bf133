//! # Pool Error Types

use std::fmt;
use std::time::Duration;

use crate::numa::NumaError;

/// A node whose pool could not be bootstrapped.
#[derive(Debug)]
pub struct NodeFailure {
    /// The failed node
    pub node: usize,
    /// Why it failed
    pub cause: NumaError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}: {}", self.node, self.cause)
    }
}

/// Per-node failures collected during bootstrap, in node order.
#[derive(Debug, Default)]
pub struct NodeFailures(pub Vec<NodeFailure>);

impl NodeFailures {
    /// IDs of the failed nodes.
    #[must_use]
    pub fn nodes(&self) -> Vec<usize> {
        self.0.iter().map(|f| f.node).collect()
    }

    /// Number of failed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no node failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the failures.
    pub fn iter(&self) -> impl Iterator<Item = &NodeFailure> {
        self.0.iter()
    }
}

impl fmt::Display for NodeFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Errors from pool lifecycle and allocation.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The platform exposes no NUMA nodes; there is no non-NUMA fallback
    #[error("NUMA is not supported on this platform")]
    NumaUnavailable,

    /// At least one node failed to bootstrap; every other node was rolled back
    #[error("Pool bootstrap failed on {} of {node_count} NUMA nodes: {failures}", .failures.len())]
    PartialInitFailure {
        /// The nodes that failed and why
        failures: NodeFailures,
        /// Number of nodes bootstrap was attempted on
        node_count: usize,
    },

    /// Not every node finished bootstrapping in time
    #[error("Pool bootstrap timed out after {timeout:?}; nodes still pending: {pending:?}")]
    InitTimeout {
        /// The configured timeout
        timeout: Duration,
        /// Nodes that had not reported
        pending: Vec<usize>,
    },

    /// Node ID outside the registry
    #[error("Invalid NUMA node: {node} (registry has {available} nodes)")]
    InvalidNode {
        /// The requested node
        node: usize,
        /// Number of pools in the registry
        available: usize,
    },

    /// Alignment is not a power of two
    #[error("Alignment must be a power of two, got {0}")]
    InvalidAlignment(usize),

    /// Request does not fit in the node's remaining capacity
    #[error("Pool on node {node} exhausted: requested {requested} bytes, {remaining} remaining")]
    PoolExhausted {
        /// The node allocated from
        node: usize,
        /// Requested size in bytes
        requested: usize,
        /// Bytes left before alignment padding
        remaining: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Topology query failed
    #[error("NUMA error: {0}")]
    Numa(#[from] NumaError),
}

impl PoolError {
    /// Errors a caller can recover from by retrying elsewhere; everything
    /// else is a deployment or configuration problem.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidNode { .. } | Self::InvalidAlignment(_) | Self::PoolExhausted { .. }
        )
    }
}
