//! Testing utilities for code built on node pools.
//!
//! Provides [`AccountingPlatform`], a [`NumaPlatform`] double that serves
//! heap memory, simulates any topology, records every allocate / lock /
//! unlock / release call, and injects per-node failures.

use std::alloc::Layout;
use std::collections::{HashMap, HashSet};
use std::io;
use std::ptr::NonNull;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::numa::{NumaError, NumaPlatform, NumaTopology};

/// Page size the double reports.
pub const TEST_PAGE_SIZE: usize = 4096;

/// Call counts recorded by an [`AccountingPlatform`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    /// Successful `alloc_on_node` calls
    pub allocs: usize,
    /// Successful `lock` calls
    pub locks: usize,
    /// `unlock` calls
    pub unlocks: usize,
    /// `release` calls
    pub releases: usize,
}

impl ResourceCounts {
    /// Every allocation was released and every lock undone.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.allocs == self.releases && self.locks == self.unlocks
    }
}

#[derive(Debug)]
struct LiveRegion {
    node: usize,
    size: usize,
    locked: bool,
}

#[derive(Debug, Default)]
struct State {
    affinity: HashMap<ThreadId, Vec<usize>>,
    live: HashMap<usize, LiveRegion>,
    counts: ResourceCounts,
    fail_affinity: HashSet<usize>,
    fail_alloc: HashSet<usize>,
    fail_lock: HashSet<usize>,
    panic_alloc: HashSet<usize>,
    stall_alloc: HashMap<usize, Duration>,
    alloc_threads: Vec<(usize, Option<String>)>,
}

/// A [`NumaPlatform`] that accounts for every resource it hands out.
///
/// Memory comes from the global allocator (zeroed, page aligned), so
/// pools built on it behave like real ones without needing NUMA hardware
/// or memlock privileges.
#[derive(Debug)]
pub struct AccountingPlatform {
    topology: Option<NumaTopology>,
    state: Mutex<State>,
}

impl AccountingPlatform {
    /// `nodes` nodes with 2 CPUs and `memory_per_node` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `nodes` is zero.
    #[must_use]
    pub fn uniform(nodes: usize, memory_per_node: u64) -> Self {
        let cpus = (0..nodes).map(|n| vec![2 * n, 2 * n + 1]).collect();
        Self::with_nodes(cpus, vec![memory_per_node; nodes])
    }

    /// A topology with explicit CPU lists and memory sizes per node.
    ///
    /// # Panics
    ///
    /// Panics if the vectors are empty or of different lengths.
    #[must_use]
    pub fn with_nodes(cpus_per_node: Vec<Vec<usize>>, memory_per_node: Vec<u64>) -> Self {
        let topology = NumaTopology::from_nodes(cpus_per_node, memory_per_node)
            .expect("valid test topology");
        Self {
            topology: Some(topology),
            state: Mutex::new(State::default()),
        }
    }

    /// A platform without NUMA support.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            topology: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Make binding to `node`'s CPU set fail.
    pub fn fail_affinity_on(&self, node: usize) {
        self.state.lock().fail_affinity.insert(node);
    }

    /// Make allocation on `node` fail as if the node were exhausted.
    pub fn fail_alloc_on(&self, node: usize) {
        self.state.lock().fail_alloc.insert(node);
    }

    /// Make locking regions of `node` fail as if `RLIMIT_MEMLOCK` were hit.
    pub fn fail_lock_on(&self, node: usize) {
        self.state.lock().fail_lock.insert(node);
    }

    /// Panic inside allocation on `node`.
    pub fn panic_alloc_on(&self, node: usize) {
        self.state.lock().panic_alloc.insert(node);
    }

    /// Sleep for `delay` before allocating on `node`.
    pub fn stall_alloc_on(&self, node: usize, delay: Duration) {
        self.state.lock().stall_alloc.insert(node, delay);
    }

    /// Snapshot of the call counts.
    #[must_use]
    pub fn counts(&self) -> ResourceCounts {
        self.state.lock().counts
    }

    /// Number of regions allocated and not yet released.
    #[must_use]
    pub fn live_regions(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Bytes currently locked, across all nodes.
    #[must_use]
    pub fn locked_bytes(&self) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|r| r.locked)
            .map(|r| r.size)
            .sum()
    }

    /// Node of each live region, sorted.
    #[must_use]
    pub fn live_nodes(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self.state.lock().live.values().map(|r| r.node).collect();
        nodes.sort_unstable();
        nodes
    }

    /// Name of the thread behind each successful allocation, sorted by node.
    #[must_use]
    pub fn alloc_threads(&self) -> Vec<(usize, Option<String>)> {
        let mut threads = self.state.lock().alloc_threads.clone();
        threads.sort();
        threads
    }

    /// CPU set of `node` in the simulated topology.
    #[must_use]
    pub fn cpus_of(&self, node: usize) -> Vec<usize> {
        self.topology
            .as_ref()
            .map(|t| t.cpus_for_node(node).to_vec())
            .unwrap_or_default()
    }

    fn all_cpus(&self) -> Vec<usize> {
        self.topology
            .as_ref()
            .map(|t| (0..t.num_cpus()).collect())
            .unwrap_or_default()
    }

    fn node_with_cpus(&self, cpus: &[usize]) -> Option<usize> {
        let topo = self.topology.as_ref()?;
        (0..topo.num_nodes()).find(|&n| !cpus.is_empty() && topo.cpus_for_node(n) == cpus)
    }

    fn layout(size: usize) -> io::Result<Layout> {
        Layout::from_size_align(size, TEST_PAGE_SIZE)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }
}

impl NumaPlatform for AccountingPlatform {
    fn topology(&self) -> Result<NumaTopology, NumaError> {
        self.topology.clone().ok_or(NumaError::NotAvailable)
    }

    fn page_size(&self) -> usize {
        TEST_PAGE_SIZE
    }

    fn set_thread_affinity(&self, cpus: &[usize]) -> io::Result<()> {
        if let Some(node) = self.node_with_cpus(cpus) {
            if self.state.lock().fail_affinity.contains(&node) {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
        }
        self.state
            .lock()
            .affinity
            .insert(thread::current().id(), cpus.to_vec());
        Ok(())
    }

    fn thread_affinity(&self) -> io::Result<Vec<usize>> {
        let current = self
            .state
            .lock()
            .affinity
            .get(&thread::current().id())
            .cloned();
        Ok(current.unwrap_or_else(|| self.all_cpus()))
    }

    fn alloc_on_node(&self, node: usize, size: usize) -> io::Result<NonNull<u8>> {
        let (stall, fail, panic) = {
            let state = self.state.lock();
            (
                state.stall_alloc.get(&node).copied(),
                state.fail_alloc.contains(&node),
                state.panic_alloc.contains(&node),
            )
        };
        if let Some(delay) = stall {
            thread::sleep(delay);
        }
        assert!(!panic, "injected allocation panic on node {node}");
        if fail || size == 0 {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }

        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))?;

        let mut state = self.state.lock();
        state.counts.allocs += 1;
        state
            .alloc_threads
            .push((node, thread::current().name().map(str::to_string)));
        state.live.insert(
            base.as_ptr() as usize,
            LiveRegion {
                node,
                size,
                locked: false,
            },
        );
        Ok(base)
    }

    unsafe fn lock(&self, base: NonNull<u8>, size: usize) -> io::Result<()> {
        let mut state = self.state.lock();
        let node = match state.live.get(&(base.as_ptr() as usize)) {
            Some(region) if region.size == size => region.node,
            _ => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
        };
        if state.fail_lock.contains(&node) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        if let Some(region) = state.live.get_mut(&(base.as_ptr() as usize)) {
            region.locked = true;
        }
        state.counts.locks += 1;
        Ok(())
    }

    unsafe fn unlock(&self, base: NonNull<u8>, _size: usize) -> io::Result<()> {
        let mut state = self.state.lock();
        state.counts.unlocks += 1;
        match state.live.get_mut(&(base.as_ptr() as usize)) {
            Some(region) if region.locked => {
                region.locked = false;
                Ok(())
            }
            _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) {
        let region = {
            let mut state = self.state.lock();
            state.counts.releases += 1;
            state.live.remove(&(base.as_ptr() as usize))
        };
        let region = region.unwrap_or_else(|| panic!("release of unknown region {base:p}"));
        assert_eq!(region.size, size, "release size mismatch for {base:p}");

        if let Ok(layout) = Self::layout(size) {
            // SAFETY: allocated in alloc_on_node with this layout
            unsafe { std::alloc::dealloc(base.as_ptr(), layout) };
        }
    }
}
