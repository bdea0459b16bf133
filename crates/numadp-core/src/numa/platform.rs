//! # Platform Services
//!
//! The operating-system capabilities pool bootstrap depends on: topology
//! queries, thread CPU affinity, node-local allocation, and page locking.
//!
//! [`LinuxPlatform`] talks to the kernel directly through `libc`
//! (`mmap` + `mbind`, `mlock`, `sched_setaffinity`) instead of linking
//! against libnuma. Other implementations (such as the accounting double
//! in [`crate::testing`]) plug in through the [`NumaPlatform`] trait.

use std::fmt;
use std::io;
use std::ptr::NonNull;

use super::{NumaError, NumaTopology};

/// Page size assumed when the platform cannot report one.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// Operating-system services required to build and tear down node pools.
///
/// Implementations must be shareable across the bootstrap worker threads.
/// Raw operations return [`io::Error`]; callers attach the node and size
/// context when turning them into [`NumaError`]s.
pub trait NumaPlatform: Send + Sync + fmt::Debug {
    /// Query the NUMA topology.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::NotAvailable`] if the platform has no NUMA
    /// support.
    fn topology(&self) -> Result<NumaTopology, NumaError>;

    /// Size of a virtual memory page in bytes.
    fn page_size(&self) -> usize;

    /// Restrict the calling thread to the given CPUs.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the kernel rejects the CPU set.
    fn set_thread_affinity(&self, cpus: &[usize]) -> io::Result<()>;

    /// Returns the CPUs the calling thread is currently allowed to run on.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the affinity mask cannot be read.
    fn thread_affinity(&self) -> io::Result<Vec<usize>>;

    /// Map `size` bytes of memory whose pages are bound to `node`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping or the node binding fails. No
    /// memory is held when an error is returned.
    fn alloc_on_node(&self, node: usize, size: usize) -> io::Result<NonNull<u8>>;

    /// Lock the region into physical memory.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the pages cannot be locked.
    ///
    /// # Safety
    ///
    /// `base..base + size` must be a live region returned by
    /// [`alloc_on_node`](Self::alloc_on_node) on this platform.
    unsafe fn lock(&self, base: NonNull<u8>, size: usize) -> io::Result<()>;

    /// Undo [`lock`](Self::lock).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the pages cannot be unlocked.
    ///
    /// # Safety
    ///
    /// Same contract as [`lock`](Self::lock).
    unsafe fn unlock(&self, base: NonNull<u8>, size: usize) -> io::Result<()>;

    /// Return the region to the operating system.
    ///
    /// # Safety
    ///
    /// `base..base + size` must be a live region returned by
    /// [`alloc_on_node`](Self::alloc_on_node) on this platform, and must not
    /// be accessed afterwards.
    unsafe fn release(&self, base: NonNull<u8>, size: usize);
}

/// [`NumaPlatform`] backed by Linux system calls.
#[derive(Debug, Clone, Default)]
pub struct LinuxPlatform {
    huge_pages: bool,
}

impl LinuxPlatform {
    /// Create a platform handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request transparent huge pages (`MADV_HUGEPAGE`) for pool regions.
    ///
    /// The hint is advisory; a kernel that declines it still serves the
    /// region with base pages.
    #[must_use]
    pub fn with_huge_pages(mut self, enabled: bool) -> Self {
        self.huge_pages = enabled;
        self
    }

    /// Whether the kernel implements the NUMA memory policy system calls.
    #[cfg(target_os = "linux")]
    fn mempolicy_supported() -> bool {
        let mut mode: libc::c_int = 0;
        // SAFETY: get_mempolicy with a null nodemask and zero flags only
        // writes the calling thread's policy mode into `mode`.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_get_mempolicy,
                &raw mut mode,
                std::ptr::null_mut::<libc::c_ulong>(),
                0usize,
                std::ptr::null_mut::<libc::c_void>(),
                0usize,
            )
        };
        rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ENOSYS)
    }

    /// Bind a fresh mapping to `node` with `MPOL_BIND`.
    #[cfg(target_os = "linux")]
    #[allow(clippy::items_after_statements)]
    fn bind_to_node(ptr: *mut libc::c_void, size: usize, node: usize) -> io::Result<()> {
        // MPOL_BIND = 2 - strictly bind to the specified nodes
        const MPOL_BIND: i32 = 2;
        // MPOL_MF_MOVE = 2 - move pages to the node if they're already faulted
        const MPOL_MF_MOVE: u32 = 2;

        // Build nodemask - a bitmask where bit N is set if node N should be used
        let mut nodemask = vec![0u64; node / 64 + 1];
        nodemask[node / 64] = 1u64 << (node % 64);
        let maxnode = nodemask.len() * 64 + 1;

        // SAFETY: `ptr..ptr + size` is a mapping we own and `nodemask` holds
        // `maxnode - 1` readable bits.
        let result = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                ptr,
                size,
                MPOL_BIND,
                nodemask.as_ptr(),
                maxnode,
                MPOL_MF_MOVE,
            )
        };

        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl NumaPlatform for LinuxPlatform {
    fn topology(&self) -> Result<NumaTopology, NumaError> {
        if !Self::mempolicy_supported() {
            return Err(NumaError::NotAvailable);
        }
        NumaTopology::probe()
    }

    fn page_size(&self) -> usize {
        // SAFETY: sysconf has no preconditions
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(page)
            .ok()
            .filter(|&p| p > 0)
            .unwrap_or(FALLBACK_PAGE_SIZE)
    }

    fn set_thread_affinity(&self, cpus: &[usize]) -> io::Result<()> {
        use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_SETSIZE, CPU_ZERO};
        use std::mem;

        #[allow(clippy::cast_sign_loss)]
        let max_cpu = CPU_SETSIZE as usize;
        if let Some(&cpu) = cpus.iter().find(|&&cpu| cpu >= max_cpu) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CPU {cpu} exceeds CPU_SETSIZE ({max_cpu})"),
            ));
        }

        // SAFETY: cpu_set_t is plain data, initialised with CPU_ZERO and only
        // indexed below CPU_SETSIZE. Pid 0 refers to the calling thread.
        let result = unsafe {
            let mut set: cpu_set_t = mem::zeroed();
            CPU_ZERO(&mut set);
            for &cpu in cpus {
                CPU_SET(cpu, &mut set);
            }
            sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &raw const set)
        };

        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn thread_affinity(&self) -> io::Result<Vec<usize>> {
        use libc::{cpu_set_t, sched_getaffinity, CPU_ISSET, CPU_SETSIZE};
        use std::mem;

        #[allow(clippy::cast_sign_loss)]
        let max_cpu = CPU_SETSIZE as usize;

        // SAFETY: the kernel fills a zeroed cpu_set_t of the size we pass.
        unsafe {
            let mut set: cpu_set_t = mem::zeroed();
            if sched_getaffinity(0, mem::size_of::<cpu_set_t>(), &raw mut set) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok((0..max_cpu).filter(|&cpu| CPU_ISSET(cpu, &set)).collect())
        }
    }

    fn alloc_on_node(&self, node: usize, size: usize) -> io::Result<NonNull<u8>> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "node reports no allocatable memory",
            ));
        }

        // SAFETY: anonymous private mapping, no file descriptor involved
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if self.huge_pages {
            // SAFETY: `ptr` was just returned by mmap with this size;
            // MADV_HUGEPAGE is advisory.
            if unsafe { libc::madvise(ptr, size, libc::MADV_HUGEPAGE) } != 0 {
                tracing::debug!(
                    "MADV_HUGEPAGE rejected on node {}: {}",
                    node,
                    io::Error::last_os_error()
                );
            }
        }

        if let Err(e) = Self::bind_to_node(ptr, size, node) {
            // SAFETY: the mapping is ours and nothing else has seen it
            unsafe {
                libc::munmap(ptr, size);
            }
            return Err(e);
        }

        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))
    }

    unsafe fn lock(&self, base: NonNull<u8>, size: usize) -> io::Result<()> {
        // SAFETY: caller guarantees the region is a live mapping
        if unsafe { libc::mlock(base.as_ptr().cast(), size) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn unlock(&self, base: NonNull<u8>, size: usize) -> io::Result<()> {
        // SAFETY: caller guarantees the region is a live mapping
        if unsafe { libc::munlock(base.as_ptr().cast(), size) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        // SAFETY: caller guarantees the region came from alloc_on_node
        if unsafe { libc::munmap(base.as_ptr().cast(), size) } != 0 {
            tracing::warn!(
                "munmap of {} bytes at {:p} failed: {}",
                size,
                base,
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl NumaPlatform for LinuxPlatform {
    fn topology(&self) -> Result<NumaTopology, NumaError> {
        Err(NumaError::NotAvailable)
    }

    fn page_size(&self) -> usize {
        FALLBACK_PAGE_SIZE
    }

    fn set_thread_affinity(&self, _cpus: &[usize]) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn thread_affinity(&self) -> io::Result<Vec<usize>> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn alloc_on_node(&self, _node: usize, _size: usize) -> io::Result<NonNull<u8>> {
        Err(io::ErrorKind::Unsupported.into())
    }

    unsafe fn lock(&self, _base: NonNull<u8>, _size: usize) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    unsafe fn unlock(&self, _base: NonNull<u8>, _size: usize) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    unsafe fn release(&self, _base: NonNull<u8>, _size: usize) {}
}
