//! # Node Pool
//!
//! One NUMA node's pinned region plus a monotonic bump cursor.
//!
//! ## Allocation
//!
//! Allocation rounds the cursor up to the requested alignment, checks the
//! request fits, and advances the cursor past it with a single
//! compare-and-swap. Concurrent callers on the same node therefore never
//! receive overlapping ranges, and a request that does not fit leaves the
//! cursor untouched.
//!
//! ```text
//!  base                    cursor                          capacity
//!   │◄──── allocated ─────►│◄──────────── free ────────────►│
//!   ├──────┬─┬─────────────┼────────────────────────────────┤
//!   │ a0   │p│ a1          │                                │
//!   └──────┴─┴─────────────┴────────────────────────────────┘
//!           p = alignment padding
//! ```
//!
//! There is no per-allocation free. [`NodePool::reset`] reclaims the whole
//! region in bulk at the end of a processing epoch.

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::region::PinnedRegion;
use super::PoolError;

/// Keeps the hot cursor on its own cache line.
#[repr(C, align(64))]
#[derive(Debug, Default)]
struct CachePadded<T> {
    value: T,
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Round `offset` up to a multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub fn align_up(offset: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    offset.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Point-in-time usage of one node pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// The NUMA node
    pub node_id: usize,
    /// Region size in bytes
    pub capacity: usize,
    /// Bytes consumed, including alignment padding
    pub used: usize,
}

impl PoolStats {
    /// Bytes left.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Fraction of the region consumed, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.used as f64 / self.capacity as f64
    }
}

/// A NUMA node's dedicated, pinned memory pool.
///
/// Created only by pool bootstrap. The region is released when the pool
/// is dropped (through [`PoolRegistry::destroy`] or rollback).
///
/// [`PoolRegistry::destroy`]: super::PoolRegistry::destroy
#[derive(Debug)]
pub struct NodePool {
    region: PinnedRegion,
    /// Next free byte offset; `0 <= cursor <= capacity`
    cursor: CachePadded<AtomicUsize>,
}

impl NodePool {
    pub(crate) fn new(region: PinnedRegion) -> Self {
        Self {
            region,
            cursor: CachePadded::default(),
        }
    }

    /// The NUMA node this pool is bound to.
    #[inline]
    #[must_use]
    pub fn node_id(&self) -> usize {
        self.region.node()
    }

    /// Total bytes in the region.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Start of the region.
    #[inline]
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.region.base()
    }

    /// Current cursor: bytes consumed including padding.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Bytes left before the pool is exhausted.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Usage snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            node_id: self.node_id(),
            capacity: self.capacity(),
            used: self.used(),
        }
    }

    /// Carve `size` bytes aligned to `align` from the pool.
    ///
    /// The returned offset is the smallest multiple of `align` at or after
    /// the cursor. The region base is page aligned, so for alignments up to
    /// the page size the address is aligned too.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidAlignment`] if `align` is not a power of
    /// two, and [`PoolError::PoolExhausted`] if the aligned request does not
    /// fit; the cursor is unchanged in both cases.
    pub fn alloc(&self, size: usize, align: usize) -> Result<Allocation<'_>, PoolError> {
        if !align.is_power_of_two() {
            return Err(PoolError::InvalidAlignment(align));
        }

        let capacity = self.capacity();
        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let fit = align_up(current, align).and_then(|offset| {
                let end = offset.checked_add(size)?;
                (end <= capacity).then_some((offset, end))
            });
            let Some((offset, end)) = fit else {
                return Err(PoolError::PoolExhausted {
                    node: self.node_id(),
                    requested: size,
                    remaining: capacity - current,
                });
            };

            match self
                .cursor
                .compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    // SAFETY: offset + size <= capacity, so the pointer stays
                    // inside the region.
                    let ptr = unsafe { self.base().add(offset) };
                    return Ok(Allocation {
                        ptr,
                        offset,
                        len: size,
                        node: self.node_id(),
                        _pool: PhantomData,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Reclaim every allocation by rewinding the cursor to zero.
    ///
    /// Requires exclusive access, so no [`Allocation`] from this pool can be
    /// alive. Memory contents are left as they were.
    pub fn reset(&mut self) {
        self.cursor.store(0, Ordering::Release);
    }
}

/// A non-owning view of bytes carved from a [`NodePool`].
///
/// Borrowed from the pool (or its registry), so it cannot outlive a reset
/// or teardown. Views returned by the allocator never overlap.
#[derive(Debug)]
pub struct Allocation<'a> {
    ptr: NonNull<u8>,
    offset: usize,
    len: usize,
    node: usize,
    _pool: PhantomData<&'a mut [u8]>,
}

// SAFETY: an Allocation is an exclusive view of a disjoint byte range,
// equivalent to `&'a mut [u8]`.
unsafe impl Send for Allocation<'_> {}
// SAFETY: see above
unsafe impl Sync for Allocation<'_> {}

impl<'a> Allocation<'a> {
    /// Offset of the allocation from the start of its node's region.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocation is zero-sized.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The NUMA node the bytes live on.
    #[inline]
    #[must_use]
    pub fn node(&self) -> usize {
        self.node
    }

    /// Raw pointer to the first byte.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Raw mutable pointer to the first byte.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// The bytes as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the range is inside a live, initialised (pre-faulted)
        // region and exclusively ours.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The bytes as a mutable slice.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Convert into a slice borrowed for the pool's lifetime.
    #[must_use]
    pub fn into_slice(self) -> &'a mut [u8] {
        // SAFETY: see `as_slice`; the view is consumed so the slice is unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::AccountingPlatform;
    use std::sync::Arc;

    fn pool(size: usize) -> (Arc<AccountingPlatform>, NodePool) {
        let platform = Arc::new(AccountingPlatform::uniform(1, 1 << 30));
        let region = PinnedRegion::acquire(platform.clone(), 0, size).unwrap();
        (platform, NodePool::new(region))
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), Some(0));
        assert_eq!(align_up(1, 64), Some(64));
        assert_eq!(align_up(64, 64), Some(64));
        assert_eq!(align_up(65, 8), Some(72));
        assert_eq!(align_up(7, 1), Some(7));
        assert_eq!(align_up(usize::MAX, 2), None);
    }

    #[test]
    fn test_sequential_offsets() {
        let (_platform, pool) = pool(1 << 20);
        let a = pool.alloc(64, 64).unwrap();
        assert_eq!(a.offset(), 0);
        let b = pool.alloc(100, 64).unwrap();
        assert_eq!(b.offset(), 64);
        let c = pool.alloc(1, 64).unwrap();
        assert_eq!(c.offset(), 192);
        assert_eq!(pool.used(), 193);
    }

    #[test]
    fn test_exhaustion_leaves_cursor() {
        let (_platform, pool) = pool(4096);
        pool.alloc(1000, 8).unwrap();
        let before = pool.used();

        let err = pool.alloc(4096, 1).unwrap_err();
        assert!(matches!(
            err,
            PoolError::PoolExhausted {
                node: 0,
                requested: 4096,
                remaining: 3096
            }
        ));
        assert_eq!(pool.used(), before);

        let rest = pool.alloc(pool.remaining(), 1).unwrap();
        assert_eq!(rest.offset(), 1000);
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn test_padding_counts_toward_capacity() {
        let (_platform, pool) = pool(128);
        pool.alloc(1, 1).unwrap();
        // 1 → 64 padding leaves exactly 64 bytes
        assert!(pool.alloc(65, 64).is_err());
        assert_eq!(pool.alloc(64, 64).unwrap().offset(), 64);
    }

    #[test]
    fn test_invalid_alignment() {
        let (_platform, pool) = pool(4096);
        for align in [0, 3, 24, 100] {
            assert!(matches!(
                pool.alloc(8, align),
                Err(PoolError::InvalidAlignment(a)) if a == align
            ));
        }
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_zero_sized_allocation() {
        let (_platform, pool) = pool(4096);
        pool.alloc(3, 1).unwrap();
        let empty = pool.alloc(0, 16).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.offset(), 16);
    }

    #[test]
    fn test_allocation_memory_is_writable() {
        let (_platform, pool) = pool(4096);
        let mut a = pool.alloc(16, 8).unwrap();
        a.as_mut_slice().copy_from_slice(&[7u8; 16]);
        assert_eq!(a.as_slice(), &[7u8; 16]);
        assert_eq!(a.as_ptr() as usize % 8, 0);
        assert_eq!(a.node(), 0);
    }

    #[test]
    fn test_reset() {
        let (_platform, mut pool) = pool(4096);
        pool.alloc(4096, 1).unwrap();
        assert_eq!(pool.remaining(), 0);

        pool.reset();
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.alloc(4096, 1).unwrap().offset(), 0);
    }

    #[test]
    fn test_stats() {
        let (_platform, pool) = pool(4096);
        pool.alloc(1024, 1).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.capacity, 4096);
        assert_eq!(stats.used, 1024);
        assert_eq!(stats.remaining(), 3072);
        assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_allocations_are_disjoint() {
        let (_platform, pool) = pool(1 << 20);
        let threads = 8;
        let per_thread = 200;

        let mut ranges: Vec<(usize, usize)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        (0..per_thread)
                            .map(|_| {
                                let a = pool.alloc(24, 8).unwrap();
                                (a.offset(), a.offset() + a.len())
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        ranges.sort_unstable();
        assert_eq!(ranges.len(), threads * per_thread);
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
        }
        assert!(ranges.iter().all(|(start, _)| start % 8 == 0));
    }
}
