//! The dataflow graph: arrows, their ports, and the wiring between them
//! (spec §3, §4.2).

mod arrow;
mod port;
mod sink;
mod source;
mod stage;
mod unfold;

pub use arrow::{Arrow, ArrowStatus, BackoffConfig, FireResult, WorkerHandle};
pub use port::Port;
pub use sink::SinkArrow;
pub use source::SourceArrow;
pub use stage::{BroadcastArrow, FnStage, StageArrow, StageLogic};
pub use unfold::UnfoldArrow;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::event::Pool;

/// Topology-wide lifecycle (spec §3 "Scheduler state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStatus {
    Paused,
    Running,
    Draining,
    Finalized,
}

/// The fixed dataflow graph for one run: an ordered arrow list plus the
/// shared Pool. The graph shape does not change once built (spec §1
/// non-goal: "dynamic graph reconfiguration during an event").
pub struct Topology {
    arrows: Vec<Box<dyn Arrow>>,
    pool: Arc<Pool>,
}

impl Topology {
    /// Build from a fully-wired arrow list (each arrow already holds its
    /// own mailbox/pool handles) plus the shared pool. Derives every
    /// non-source arrow's initial `active_upstream_count` from how many
    /// other arrows declare it as a downstream (spec §4.2 activation
    /// propagation); sources keep the self-count of 1 set at construction.
    pub fn new(arrows: Vec<Box<dyn Arrow>>, pool: Arc<Pool>) -> Self {
        let mut upstream_counts = vec![0usize; arrows.len()];
        for arrow in &arrows {
            for &downstream_idx in arrow.downstream() {
                upstream_counts[downstream_idx] += 1;
            }
        }
        for (idx, arrow) in arrows.iter().enumerate() {
            if !arrow.is_source() {
                arrow.active_upstream_count().store(upstream_counts[idx], Ordering::Release);
            }
        }
        Topology { arrows, pool }
    }

    pub fn arrows(&self) -> &[Box<dyn Arrow>] {
        &self.arrows
    }

    pub fn arrow(&self, idx: usize) -> &dyn Arrow {
        self.arrows[idx].as_ref()
    }

    pub fn len(&self) -> usize {
        self.arrows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrows.is_empty()
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}
