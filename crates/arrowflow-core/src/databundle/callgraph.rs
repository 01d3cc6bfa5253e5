//! Optional call-graph recorder for `FactorySet::create_and_get` re-entrancy
//! (spec §4.1: "records (caller_type, caller_tag) → (callee_type, callee_tag)
//! edges to enable ancestor queries and to aid diagnostics").

use std::collections::HashSet;

use super::bundle::BundleKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallEdge {
    pub caller: BundleKey,
    pub callee: BundleKey,
}

/// Records one edge per (caller, callee) pair per event, as spec §8's S4
/// requires ("exactly one edge per (caller,callee) pair per event").
#[derive(Debug, Default)]
pub struct CallGraphRecorder {
    edges: HashSet<CallEdge>,
}

impl CallGraphRecorder {
    pub fn new() -> Self {
        CallGraphRecorder::default()
    }

    pub fn record(&mut self, caller: &BundleKey, callee: &BundleKey) {
        self.edges.insert(CallEdge { caller: caller.clone(), callee: callee.clone() });
    }

    pub fn edges(&self) -> impl Iterator<Item = &CallEdge> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Ancestors of `key`: everything transitively reachable by following
    /// `callee -> caller` edges backwards (i.e. "who ultimately requested
    /// this bundle").
    pub fn ancestors(&self, key: &BundleKey) -> HashSet<BundleKey> {
        let mut found = HashSet::new();
        let mut frontier = vec![key.clone()];
        while let Some(current) = frontier.pop() {
            for edge in &self.edges {
                if edge.callee == current && found.insert(edge.caller.clone()) {
                    frontier.push(edge.caller.clone());
                }
            }
        }
        found
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }
}
