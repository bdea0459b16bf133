//! Pinned, node-local memory region.
//!
//! A [`PinnedRegion`] exists only while its memory is allocated *and*
//! locked. Construction performs allocate → lock → pre-fault and undoes
//! the allocation if locking fails; dropping performs unlock → release.
//! Each step therefore runs exactly once per region.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::numa::{NumaError, NumaPlatform};

/// A contiguous memory region bound to one NUMA node and locked into RAM.
pub struct PinnedRegion {
    base: NonNull<u8>,
    size: usize,
    node: usize,
    platform: Arc<dyn NumaPlatform>,
}

// SAFETY: the region is plain memory owned exclusively by this value;
// concurrent access to its bytes is coordinated by the owning NodePool.
unsafe impl Send for PinnedRegion {}
// SAFETY: shared references only expose the base address and metadata.
unsafe impl Sync for PinnedRegion {}

impl PinnedRegion {
    /// Allocate `size` bytes on `node`, lock them and touch every page.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::NodeAllocFailed`] if the node cannot supply the
    /// memory and [`NumaError::PinFailed`] if it cannot be locked. In the
    /// latter case the allocation has already been released.
    pub fn acquire(
        platform: Arc<dyn NumaPlatform>,
        node: usize,
        size: usize,
    ) -> Result<Self, NumaError> {
        let base = platform
            .alloc_on_node(node, size)
            .map_err(|e| NumaError::NodeAllocFailed {
                node,
                size,
                reason: e.to_string(),
            })?;
        tracing::debug!("Allocated {} bytes at {:p} on node {}", size, base, node);

        // SAFETY: `base..base + size` was just returned by alloc_on_node
        if let Err(e) = unsafe { platform.lock(base, size) } {
            // SAFETY: the region is unlocked and unused
            unsafe { platform.release(base, size) };
            return Err(NumaError::PinFailed {
                node,
                size,
                reason: pin_failure_reason(&e),
            });
        }

        let region = Self {
            base,
            size,
            node,
            platform,
        };
        region.prefault();
        Ok(region)
    }

    /// Write one byte in every page so all mappings are resolved now.
    fn prefault(&self) {
        let page = self.platform.page_size().max(1);
        let base = self.base.as_ptr();
        for offset in (0..self.size).step_by(page) {
            // SAFETY: offset < size, inside the region we own. Volatile keeps
            // the compiler from eliding the stores.
            unsafe { ptr::write_volatile(base.add(offset), 0) };
        }
        tracing::debug!(
            "Pre-faulted {} pages on node {}",
            self.size.div_ceil(page),
            self.node
        );
    }

    /// Start of the region.
    #[inline]
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length of the region in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The NUMA node the region is bound to.
    #[inline]
    #[must_use]
    pub fn node(&self) -> usize {
        self.node
    }
}

impl std::fmt::Debug for PinnedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedRegion")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

impl Drop for PinnedRegion {
    fn drop(&mut self) {
        // SAFETY: the region is live and locked; nothing borrows it once the
        // owner is being dropped.
        unsafe {
            if let Err(e) = self.platform.unlock(self.base, self.size) {
                tracing::warn!(
                    "munlock of {} bytes on node {} failed: {}",
                    self.size,
                    self.node,
                    e
                );
            }
            self.platform.release(self.base, self.size);
        }
        tracing::debug!("Released {} bytes on node {}", self.size, self.node);
    }
}

/// Describe a lock failure, pointing at the usual deployment cause.
fn pin_failure_reason(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(libc::ENOMEM | libc::EPERM | libc::EAGAIN) => format!(
            "mlock failed: {err} (check RLIMIT_MEMLOCK / `ulimit -l` or grant CAP_IPC_LOCK)"
        ),
        _ => format!("mlock failed: {err}"),
    }
}
