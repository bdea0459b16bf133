//! # NUMA Error Types
//!
//! Errors raised by the platform layer and by a single node's pool
//! bootstrap. Lifecycle-level aggregation lives in [`crate::pool::PoolError`].

/// Errors that can occur during NUMA operations.
#[derive(Debug, thiserror::Error)]
pub enum NumaError {
    /// NUMA not available on this platform
    #[error("NUMA not available on this platform")]
    NotAvailable,

    /// Topology detection failed
    #[error("Topology detection failed: {0}")]
    TopologyError(String),

    /// Invalid NUMA node
    #[error("Invalid NUMA node: {node} (system has {available} nodes)")]
    InvalidNode {
        /// The requested node
        node: usize,
        /// Number of available nodes
        available: usize,
    },

    /// The calling thread could not be bound to the node's CPU set
    #[error("Failed to bind thread to NUMA node {node}: {reason}")]
    AffinityBindFailed {
        /// The target node
        node: usize,
        /// Why the bind was rejected
        reason: String,
    },

    /// Node-local allocation failed
    #[error("Failed to allocate {size} bytes on NUMA node {node}: {reason}")]
    NodeAllocFailed {
        /// The target node
        node: usize,
        /// Requested region size in bytes
        size: usize,
        /// Underlying failure
        reason: String,
    },

    /// The region could not be locked into physical memory
    #[error("Failed to pin {size} bytes on NUMA node {node}: {reason}")]
    PinFailed {
        /// The node owning the region
        node: usize,
        /// Region size in bytes
        size: usize,
        /// Underlying failure
        reason: String,
    },

    /// A bootstrap worker could not be started or exited without a result
    #[error("Bootstrap worker for NUMA node {node} failed: {reason}")]
    WorkerFailed {
        /// The node the worker was responsible for
        node: usize,
        /// What went wrong
        reason: String,
    },

    /// System call failed
    #[error("System call failed: {0}")]
    SyscallFailed(#[from] std::io::Error),
}

impl NumaError {
    /// Returns the node this error is attributed to, if any.
    #[must_use]
    pub fn node(&self) -> Option<usize> {
        match self {
            Self::InvalidNode { node, .. }
            | Self::AffinityBindFailed { node, .. }
            | Self::NodeAllocFailed { node, .. }
            | Self::PinFailed { node, .. }
            | Self::WorkerFailed { node, .. } => Some(*node),
            Self::NotAvailable | Self::TopologyError(_) | Self::SyscallFailed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_node_and_reason() {
        let err = NumaError::PinFailed {
            node: 1,
            size: 4096,
            reason: "Cannot allocate memory".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("node 1"));
        assert!(msg.contains("4096"));
        assert!(msg.contains("Cannot allocate memory"));
    }

    #[test]
    fn test_node_attribution() {
        let err = NumaError::AffinityBindFailed {
            node: 3,
            reason: "no CPUs".to_string(),
        };
        assert_eq!(err.node(), Some(3));
        assert_eq!(NumaError::NotAvailable.node(), None);
    }
}
