//! # NUMA Platform Layer
//!
//! Topology discovery, thread affinity and node-local memory primitives
//! that node pools are built from. On multi-socket systems, memory access
//! latency varies by 2-3x depending on whether memory is local or remote
//! to the CPU.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐         ┌─────────────────────┐
//! │      Socket 0       │         │      Socket 1       │
//! │  ┌───────────────┐  │         │  ┌───────────────┐  │
//! │  │  Cores 0-15   │  │         │  │  Cores 16-31  │  │
//! │  └───────┬───────┘  │         │  └───────┬───────┘  │
//! │          │          │         │          │          │
//! │  ┌───────▼───────┐  │  QPI    │  ┌───────▼───────┐  │
//! │  │  Node 0 pool  │◄─┼─────────┼─►│  Node 1 pool  │  │
//! │  │  (~100ns)     │  │ (~150ns)│  │  (~100ns)     │  │
//! │  └───────────────┘  │         │  └───────────────┘  │
//! └─────────────────────┘         └─────────────────────┘
//! ```
//!
//! ## Components
//!
//! - [`NumaTopology`] - Detects system NUMA topology
//! - [`NumaPlatform`] - OS services (affinity, node-local mapping, page locking)
//! - [`LinuxPlatform`] - `libc` implementation of [`NumaPlatform`]
//! - [`AffinityBinder`] - Pins threads to a node's CPU set
//!
//! ## Platform Support
//!
//! | Platform | Support |
//! |----------|---------|
//! | Linux | Full NUMA support |
//! | Other | NUMA reported unavailable |

mod affinity;
mod error;
mod platform;
mod topology;

pub use affinity::{AffinityBinder, AffinityGuard};
pub use error::NumaError;
pub use platform::{LinuxPlatform, NumaPlatform, FALLBACK_PAGE_SIZE};
pub use topology::NumaTopology;

/// Result type for NUMA operations.
pub type Result<T> = std::result::Result<T, NumaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_platform_topology() {
        // Either a real topology or a clean NotAvailable; never a panic.
        match LinuxPlatform::new().topology() {
            Ok(topo) => assert!(topo.num_nodes() >= 1),
            Err(e) => assert!(matches!(
                e,
                NumaError::NotAvailable | NumaError::TopologyError(_)
            )),
        }
    }
}
