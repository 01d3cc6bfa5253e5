//! CPU topology discovery and locality/affinity strategies (spec §5, §6).
//!
//! A full hwloc-style inventory is out of scope for this port (spec §1:
//! plugin loading and platform backends are external collaborators); this
//! builds a best-effort single-level table from
//! `std::thread::available_parallelism()` and documents the simplification
//! in DESIGN.md. Real topology readers can replace `CpuTopology::discover`
//! without touching callers, since they only see the `(cpu, core,
//! numa_node, socket)` rows.

use crate::config::{AffinityStrategy, LocalityStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRow {
    pub cpu: usize,
    pub core: usize,
    pub numa_node: usize,
    pub socket: usize,
}

#[derive(Debug, Clone)]
pub struct CpuTopology {
    rows: Vec<CpuRow>,
}

impl CpuTopology {
    /// Best-effort inventory: one row per logical CPU reported by the
    /// standard library, with synthetic core/numa/socket ids (no SMT or
    /// multi-socket structure is inferred without a real OS backend).
    pub fn discover() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let rows = (0..n).map(|cpu| CpuRow { cpu, core: cpu, numa_node: 0, socket: 0 }).collect();
        CpuTopology { rows }
    }

    pub fn single_cpu() -> Self {
        CpuTopology { rows: vec![CpuRow { cpu: 0, core: 0, numa_node: 0, socket: 0 }] }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[CpuRow] {
        &self.rows
    }

    /// CPU ordering consistent with the affinity strategy (spec §6:
    /// "ComputeBound sorts by CPU; MemoryBound prefers filling one NUMA
    /// node before crossing sockets").
    pub fn ordered_for(&self, affinity: AffinityStrategy) -> Vec<CpuRow> {
        let mut rows = self.rows.clone();
        match affinity {
            AffinityStrategy::None => {}
            AffinityStrategy::ComputeBound => rows.sort_by_key(|r| r.cpu),
            AffinityStrategy::MemoryBound => rows.sort_by_key(|r| (r.numa_node, r.socket, r.cpu)),
        }
        rows
    }

    /// The mailbox/pool segment a worker at `worker_idx` should prefer,
    /// derived from the locality strategy (spec §6 `locality` key).
    pub fn location_id_for(&self, strategy: LocalityStrategy, worker_idx: usize) -> usize {
        if self.is_empty() {
            return 0;
        }
        let row = &self.rows[worker_idx % self.rows.len()];
        match strategy {
            LocalityStrategy::Global => 0,
            LocalityStrategy::Socket => row.socket,
            LocalityStrategy::Numa => row.numa_node,
            LocalityStrategy::Core => row.core,
            LocalityStrategy::Cpu => row.cpu,
        }
    }

    /// Number of distinct segments a given locality strategy partitions
    /// into, used to size the Pool's segment array.
    pub fn segment_count(&self, strategy: LocalityStrategy) -> usize {
        match strategy {
            LocalityStrategy::Global => 1,
            LocalityStrategy::Socket => self.rows.iter().map(|r| r.socket).max().map(|m| m + 1).unwrap_or(1),
            LocalityStrategy::Numa => self.rows.iter().map(|r| r.numa_node).max().map(|m| m + 1).unwrap_or(1),
            LocalityStrategy::Core => self.rows.iter().map(|r| r.core).max().map(|m| m + 1).unwrap_or(1),
            LocalityStrategy::Cpu => self.rows.len().max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_never_returns_empty() {
        let topo = CpuTopology::discover();
        assert!(!topo.is_empty());
    }

    #[test]
    fn global_locality_collapses_to_one_segment() {
        let topo = CpuTopology::discover();
        assert_eq!(topo.segment_count(LocalityStrategy::Global), 1);
        assert_eq!(topo.location_id_for(LocalityStrategy::Global, 3), 0);
    }

    #[test]
    fn cpu_locality_tracks_worker_index() {
        let topo = CpuTopology::single_cpu();
        assert_eq!(topo.location_id_for(LocalityStrategy::Cpu, 0), 0);
    }
}
