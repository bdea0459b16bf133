//! # NUMA Topology Detection
//!
//! Detects system NUMA topology using:
//! 1. hwlocality crate (if `hwloc` feature enabled)
//! 2. sysfs parsing on Linux
//!
//! There is no single-node fallback: a platform that does not expose NUMA
//! nodes is reported as [`NumaError::NotAvailable`] and pool bootstrap
//! refuses to run on it.

use super::NumaError;

/// Path where the Linux kernel exposes NUMA nodes.
#[cfg(target_os = "linux")]
pub(crate) const SYSFS_NODE_PATH: &str = "/sys/devices/system/node";

/// NUMA topology information for the system.
///
/// Provides information about NUMA nodes, which CPUs belong to each node,
/// and memory available per node. Node IDs are dense indices; a node that
/// is enumerated by the kernel but has no CPUs or no memory (sparse or
/// memoryless nodes) keeps its slot with empty values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaTopology {
    /// Number of NUMA nodes
    num_nodes: usize,
    /// CPUs per node (index = node ID)
    cpus_per_node: Vec<Vec<usize>>,
    /// Memory per node in bytes (index = node ID)
    memory_per_node: Vec<u64>,
    /// Total number of CPUs
    num_cpus: usize,
    /// CPU to NUMA node mapping
    cpu_to_node: Vec<usize>,
}

impl NumaTopology {
    /// Build a topology from explicit per-node CPU lists and memory sizes.
    ///
    /// Used by platform implementations that obtain topology from somewhere
    /// other than sysfs (and by test doubles).
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::TopologyError`] if the two vectors disagree in
    /// length, and [`NumaError::NotAvailable`] if they are empty.
    pub fn from_nodes(
        cpus_per_node: Vec<Vec<usize>>,
        memory_per_node: Vec<u64>,
    ) -> Result<Self, NumaError> {
        if cpus_per_node.len() != memory_per_node.len() {
            return Err(NumaError::TopologyError(format!(
                "{} CPU lists for {} memory entries",
                cpus_per_node.len(),
                memory_per_node.len()
            )));
        }
        if cpus_per_node.is_empty() {
            return Err(NumaError::NotAvailable);
        }

        let num_cpus = cpus_per_node
            .iter()
            .flatten()
            .max()
            .map_or(0, |max| max + 1);
        let mut cpu_to_node = vec![0usize; num_cpus];
        for (node, cpus) in cpus_per_node.iter().enumerate() {
            for &cpu in cpus {
                cpu_to_node[cpu] = node;
            }
        }

        Ok(Self {
            num_nodes: cpus_per_node.len(),
            cpus_per_node,
            memory_per_node,
            num_cpus,
            cpu_to_node,
        })
    }

    /// Build a topology from `(os_node_id, cpus, memory)` entries.
    ///
    /// Nodes are placed at their OS node ID, so IDs missing from a sparse
    /// machine become empty slots and every node ID stays valid for
    /// `mbind`.
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::NotAvailable`] if `nodes` is empty.
    pub fn from_indexed_nodes(
        nodes: impl IntoIterator<Item = (usize, Vec<usize>, u64)>,
    ) -> Result<Self, NumaError> {
        let nodes: Vec<_> = nodes.into_iter().collect();
        let num_nodes = nodes
            .iter()
            .map(|(id, _, _)| id + 1)
            .max()
            .ok_or(NumaError::NotAvailable)?;

        let mut cpus_per_node = vec![Vec::new(); num_nodes];
        let mut memory_per_node = vec![0u64; num_nodes];
        for (id, cpus, memory) in nodes {
            cpus_per_node[id] = cpus;
            memory_per_node[id] = memory;
        }

        Self::from_nodes(cpus_per_node, memory_per_node)
    }

    /// Probe the system's NUMA topology.
    ///
    /// Uses the best available method for the platform:
    /// - `hwloc` feature: hwlocality, falling back to sysfs
    /// - Linux: Reads from sysfs (`/sys/devices/system/node/`)
    /// - Other: NUMA is reported unavailable
    ///
    /// # Errors
    ///
    /// Returns [`NumaError::NotAvailable`] if the platform exposes no NUMA
    /// nodes, or [`NumaError::TopologyError`] if they cannot be read.
    pub fn probe() -> Result<Self, NumaError> {
        #[cfg(feature = "hwloc")]
        {
            match Self::detect_hwlocality() {
                Ok(topo) => return Ok(topo),
                Err(e) => tracing::debug!("hwlocality detection failed, trying sysfs: {e}"),
            }
        }

        #[cfg(target_os = "linux")]
        {
            Self::detect_sysfs(std::path::Path::new(SYSFS_NODE_PATH))
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(NumaError::NotAvailable)
        }
    }

    /// Detect topology using hwlocality crate.
    #[cfg(feature = "hwloc")]
    fn detect_hwlocality() -> Result<Self, NumaError> {
        use hwlocality::Topology;

        let hwloc_topo = Topology::new()
            .map_err(|e| NumaError::TopologyError(format!("hwlocality init failed: {e}")))?;

        let numa_nodes: Vec<_> = hwloc_topo
            .objects_with_type(hwlocality::object::types::ObjectType::NUMANode)
            .collect();

        if numa_nodes.is_empty() {
            return Err(NumaError::NotAvailable);
        }

        let mut nodes = Vec::with_capacity(numa_nodes.len());
        for numa_node in &numa_nodes {
            let Some(os_index) = numa_node.os_index() else {
                return Err(NumaError::TopologyError(
                    "hwlocality reported a NUMA node without an OS index".to_string(),
                ));
            };
            let memory = numa_node.total_memory();
            let cpus = numa_node
                .cpuset()
                .map(|cpuset| cpuset.iter_set().map(usize::from).collect())
                .unwrap_or_default();
            nodes.push((os_index, cpus, memory));
        }

        Self::from_indexed_nodes(nodes)
    }

    /// Detect topology from a sysfs node directory on Linux.
    #[cfg(target_os = "linux")]
    pub(crate) fn detect_sysfs(node_path: &std::path::Path) -> Result<Self, NumaError> {
        use std::fs;

        if !node_path.exists() {
            return Err(NumaError::NotAvailable);
        }

        let mut node_dirs: Vec<usize> = Vec::new();
        for entry in fs::read_dir(node_path)
            .map_err(|e| NumaError::TopologyError(format!("Failed to read node dir: {e}")))?
        {
            let entry = entry
                .map_err(|e| NumaError::TopologyError(format!("Failed to read entry: {e}")))?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(id) = name_str.strip_prefix("node") {
                if let Ok(node_id) = id.parse::<usize>() {
                    node_dirs.push(node_id);
                }
            }
        }

        if node_dirs.is_empty() {
            return Err(NumaError::NotAvailable);
        }

        node_dirs.sort_unstable();

        let nodes = node_dirs.into_iter().map(|node_id| {
            let node_dir = node_path.join(format!("node{node_id}"));
            let cpus = fs::read_to_string(node_dir.join("cpulist"))
                .map(|cpulist| Self::parse_cpulist(cpulist.trim()))
                .unwrap_or_default();
            let memory = fs::read_to_string(node_dir.join("meminfo"))
                .map(|meminfo| Self::parse_meminfo(&meminfo))
                .unwrap_or(0);
            (node_id, cpus, memory)
        });

        let mut topo = Self::from_indexed_nodes(nodes)?;
        topo.num_cpus = topo.num_cpus.max(Self::get_cpu_count());
        topo.cpu_to_node.resize(topo.num_cpus, 0);
        Ok(topo)
    }

    /// Get CPU count from sysfs.
    #[cfg(target_os = "linux")]
    fn get_cpu_count() -> usize {
        if let Ok(online) = std::fs::read_to_string("/sys/devices/system/cpu/online") {
            let cpus = Self::parse_cpulist(online.trim());
            if let Some(max) = cpus.iter().max() {
                return max + 1;
            }
        }

        num_cpus::get()
    }

    /// Parse a CPU list string like "0-7,16-23".
    pub(crate) fn parse_cpulist(s: &str) -> Vec<usize> {
        let mut cpus = Vec::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some((start, end)) = part.split_once('-') {
                if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                    cpus.extend(start..=end);
                }
            } else if let Ok(cpu) = part.parse::<usize>() {
                cpus.push(cpu);
            }
        }

        cpus
    }

    /// Parse a node meminfo file for total memory.
    pub(crate) fn parse_meminfo(s: &str) -> u64 {
        for line in s.lines() {
            // "Node X MemTotal:       NNNN kB"
            if line.contains("MemTotal") {
                let parts: Vec<&str> = line.split_whitespace().collect();
                for (i, part) in parts.iter().enumerate() {
                    if let Ok(val) = part.parse::<u64>() {
                        // The node index precedes the field name; skip it.
                        if i + 1 < parts.len() && parts[i + 1].starts_with("MemTotal") {
                            continue;
                        }
                        if parts.get(i + 1).is_some_and(|&u| u == "kB") {
                            return val * 1024;
                        }
                        return val;
                    }
                }
            }
        }
        0
    }

    /// Returns the number of NUMA nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Returns the total number of CPUs.
    #[must_use]
    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    /// Returns the CPUs belonging to a specific NUMA node.
    ///
    /// Returns an empty slice if the node ID is invalid.
    #[must_use]
    pub fn cpus_for_node(&self, node: usize) -> &[usize] {
        self.cpus_per_node.get(node).map_or(&[], Vec::as_slice)
    }

    /// Returns the memory (in bytes) for a specific NUMA node.
    #[must_use]
    pub fn memory_for_node(&self, node: usize) -> u64 {
        self.memory_per_node.get(node).copied().unwrap_or(0)
    }

    /// Returns the NUMA node for a given CPU.
    ///
    /// Returns 0 if the CPU ID is invalid.
    #[must_use]
    pub fn node_for_cpu(&self, cpu: usize) -> usize {
        self.cpu_to_node.get(cpu).copied().unwrap_or(0)
    }

    /// Returns the NUMA node for the current CPU.
    #[must_use]
    pub fn current_node(&self) -> usize {
        self.node_for_cpu(Self::current_cpu())
    }

    /// Returns the current CPU ID.
    #[must_use]
    pub fn current_cpu() -> usize {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: sched_getcpu takes no arguments and only reads scheduler state
            let cpu = unsafe { libc::sched_getcpu() };
            if let Ok(cpu) = usize::try_from(cpu) {
                return cpu;
            }
        }

        0
    }

    /// Check if the system has multiple NUMA nodes.
    #[must_use]
    pub fn is_numa(&self) -> bool {
        self.num_nodes > 1
    }

    /// Log the detected topology for debugging.
    pub fn log_topology(&self) {
        tracing::info!("NUMA Topology: {} nodes, {} CPUs", self.num_nodes, self.num_cpus);
        for node in 0..self.num_nodes {
            let cpus = self.cpus_for_node(node);
            let memory_mb = self.memory_for_node(node) / (1024 * 1024);
            tracing::info!(
                "  Node {}: {} CPUs ({:?}), {} MB memory",
                node,
                cpus.len(),
                cpus,
                memory_mb
            );
        }
    }

    /// Get a summary string of the topology.
    #[must_use]
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let mut s = format!("NUMA: {} nodes, {} CPUs", self.num_nodes, self.num_cpus);
        for node in 0..self.num_nodes {
            let cpus = self.cpus_for_node(node);
            let memory_mb = self.memory_for_node(node) / (1024 * 1024);
            let _ = write!(s, "\n  Node {}: {} CPUs, {} MB", node, cpus.len(), memory_mb);
        }
        s
    }
}
