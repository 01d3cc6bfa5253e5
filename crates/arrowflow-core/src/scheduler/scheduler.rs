//! The arrow scheduler (spec §4.4).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::context::EngineContext;
use crate::errors::{EngineError, EngineResult};
use crate::topology::{ArrowStatus, FireResult, Topology, TopologyStatus};

use super::state::ArrowRuntime;

struct SchedulerInner {
    arrow_runtime: Vec<ArrowRuntime>,
    topology_status: TopologyStatus,
}

/// Assigns ready arrows to worker threads, tracks per-arrow status, and
/// propagates finalization (spec §4.4). Arrow execution itself
/// (`Arrow::fire`) happens outside the scheduler mutex; only the assignment
/// decision and status bookkeeping are serialized.
pub struct Scheduler {
    topology: Arc<Topology>,
    ctx: EngineContext,
    inner: Mutex<SchedulerInner>,
}

impl Scheduler {
    pub fn new(topology: Arc<Topology>, ctx: EngineContext) -> Self {
        let arrow_runtime = (0..topology.len()).map(|_| ArrowRuntime::new()).collect();
        Scheduler { topology,
                    ctx,
                    inner: Mutex::new(SchedulerInner { arrow_runtime, topology_status: TopologyStatus::Paused }) }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn topology_status(&self) -> TopologyStatus {
        self.inner.lock().unwrap().topology_status
    }

    pub fn arrow_status(&self, idx: usize) -> ArrowStatus {
        self.inner.lock().unwrap().arrow_runtime[idx].status
    }

    /// Call every arrow's `open` hook exactly once, transitioning
    /// `Uninitialized -> Unopened`. Failure here means the topology never
    /// reaches `Running` (spec §7 `InitializationFailure`).
    pub fn open_topology(&self) -> EngineResult<()> {
        for (idx, arrow) in self.topology.arrows().iter().enumerate() {
            arrow.open(&self.ctx).map_err(|e| {
                                       EngineError::InitializationFailure { component: "arrow",
                                                                            name: arrow.name().to_string(),
                                                                            message: e.to_string() }
                                   })?;
            self.inner.lock().unwrap().arrow_runtime[idx].status = ArrowStatus::Unopened;
        }
        Ok(())
    }

    /// `run_topology`: require `Paused`, mark every arrow `Running`, set
    /// topology `Running` (spec §4.4).
    pub fn run_topology(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.topology_status != TopologyStatus::Paused {
            return Err(EngineError::InvalidTransition(format!("run_topology from {:?}", inner.topology_status)));
        }
        for rt in &mut inner.arrow_runtime {
            if rt.status == ArrowStatus::Unopened || rt.status == ArrowStatus::Paused {
                rt.status = ArrowStatus::Running;
            }
        }
        inner.topology_status = TopologyStatus::Running;
        info!("topology running");
        Ok(())
    }

    /// `request_topology_pause`: cooperative; workers observe this on their
    /// next `next_assignment` call and idle out of their loops (spec §4.4,
    /// §5 "Cancellation").
    pub fn request_topology_pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.topology_status = TopologyStatus::Paused;
        for rt in &mut inner.arrow_runtime {
            if rt.status == ArrowStatus::Running {
                rt.status = ArrowStatus::Paused;
            }
        }
    }

    /// `drain_topology`: stop issuing source assignments, keep flushing
    /// internal mailboxes through to the sinks.
    pub fn drain_topology(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.topology_status = TopologyStatus::Draining;
        let source_idxs: Vec<usize> = (0..inner.arrow_runtime.len())
            .filter(|&idx| self.topology.arrow(idx).is_source() && inner.arrow_runtime[idx].status == ArrowStatus::Running)
            .collect();
        for idx in source_idxs {
            let rt = &mut inner.arrow_runtime[idx];
            rt.status = ArrowStatus::Finished;
            if rt.in_flight == 0 {
                self.finalize_locked(&mut inner, idx);
            }
        }
    }

    /// `next_assignment(worker_id, prev_arrow, prev_status)` (spec §4.4).
    /// `cursor` is the worker's own round-robin position; returns the
    /// assignment plus the cursor to remember for the following call.
    pub fn next_assignment(&self, cursor: usize, prev: Option<(usize, FireResult)>) -> (Option<usize>, usize) {
        let mut inner = self.inner.lock().unwrap();

        if let Some((prev_idx, prev_status)) = prev {
            let rt = &mut inner.arrow_runtime[prev_idx];
            rt.in_flight = rt.in_flight.saturating_sub(1);
            if prev_status == FireResult::Finished && rt.status == ArrowStatus::Running {
                rt.status = ArrowStatus::Finished;
            }
            // Re-check regardless of *how* status became Finished: a
            // concurrent `drain_topology`/`finalize_locked` cascade may have
            // set it directly, outside this fire's own completion.
            if inner.arrow_runtime[prev_idx].status == ArrowStatus::Finished && inner.arrow_runtime[prev_idx].in_flight == 0 {
                self.finalize_locked(&mut inner, prev_idx);
            }
        }

        if inner.topology_status != TopologyStatus::Running && inner.topology_status != TopologyStatus::Draining {
            return (None, cursor);
        }

        let n = self.topology.len();
        if n == 0 {
            return (None, cursor);
        }

        for offset in 0..n {
            let idx = (cursor + offset) % n;
            let arrow = self.topology.arrow(idx);
            let rt = &inner.arrow_runtime[idx];

            let skip = matches!(rt.status,
                                 ArrowStatus::Paused | ArrowStatus::Finished | ArrowStatus::Finalized | ArrowStatus::Uninitialized)
                       || (!arrow.is_parallel() && rt.in_flight >= 1);
            if skip {
                continue;
            }

            if arrow.ready_to_fire() {
                inner.arrow_runtime[idx].in_flight += 1;
                let next_cursor = (idx + 1) % n;
                return (Some(idx), next_cursor);
            }
        }

        (None, cursor)
    }

    /// `finalize(arrow)`: close it, propagate activation to downstreams,
    /// and collapse the topology to `Finalized` once every arrow has
    /// (spec §4.4).
    fn finalize_locked(&self, inner: &mut SchedulerInner, idx: usize) {
        if inner.arrow_runtime[idx].status == ArrowStatus::Finalized {
            return;
        }

        let arrow = self.topology.arrow(idx);
        if let Err(e) = arrow.close() {
            warn!("arrow \"{}\" Close hook failed: {e}", arrow.name());
        }
        inner.arrow_runtime[idx].status = ArrowStatus::Finalized;
        debug!("arrow \"{}\" finalized", arrow.name());

        for &downstream_idx in arrow.downstream() {
            let remaining = self.topology.arrow(downstream_idx).decrement_active_upstream();
            if remaining == 0 && self.topology.arrow(downstream_idx).input_is_empty() {
                let drt = &mut inner.arrow_runtime[downstream_idx];
                if drt.status != ArrowStatus::Finalized {
                    drt.status = ArrowStatus::Finished;
                    if inner.arrow_runtime[downstream_idx].in_flight == 0 {
                        // No worker is mid-fire on it: finalize right away
                        // rather than waiting for a `next_assignment` call
                        // that may never come if nothing else touches it.
                        self.finalize_locked(inner, downstream_idx);
                    }
                }
            }
        }

        if inner.arrow_runtime.iter().all(|rt| rt.status == ArrowStatus::Finalized) {
            inner.topology_status = TopologyStatus::Finalized;
            info!("topology finalized");
        }
    }

    /// `finalize_topology`: force-close every arrow still open (used at
    /// shutdown, e.g. after an exception drains the topology early).
    pub fn finalize_topology(&self) {
        let mut inner = self.inner.lock().unwrap();
        for idx in 0..self.topology.len() {
            if inner.arrow_runtime[idx].status != ArrowStatus::Finalized {
                self.finalize_locked(&mut inner, idx);
            }
        }
    }
}
