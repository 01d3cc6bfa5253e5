//! The `Arrow` trait and the scheduler-facing status it carries (spec §3,
//! §4.2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::config::BackoffStrategy;
use crate::context::EngineContext;
use crate::errors::EngineResult;

use super::port::Port;

/// Outcome of a single `fire` call. One call processes at most `chunk_size`
/// events; the worker loop (not `fire` itself) owns the backoff/retry policy
/// between calls (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireResult {
    KeepGoing,
    ComeBackLater,
    Finished,
}

/// Per-arrow scheduler state (spec §3 "Scheduler state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowStatus {
    Uninitialized,
    Unopened,
    Running,
    Paused,
    Finished,
    Finalized,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    pub initial: Duration,
    pub tries: u32,
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based), per the strategy.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Linear => self.initial * (attempt + 1),
            BackoffStrategy::Exponential => self.initial * 2u32.saturating_pow(attempt),
        }
    }
}

/// Identifies the worker executing a `fire` call, so arrows can prefer the
/// matching locality segment on their mailboxes/pool (spec §4.3, §4.5).
#[derive(Debug, Clone, Copy)]
pub struct WorkerHandle {
    pub worker_id: usize,
    pub location_id: usize,
}

/// A node in the dataflow graph (spec §3, §4.2). Implementations: `Source`,
/// `Stage`, `Broadcast`, `Sink`.
pub trait Arrow: Send + Sync {
    fn name(&self) -> &str;

    fn is_parallel(&self) -> bool;

    fn is_source(&self) -> bool {
        false
    }

    fn is_sink(&self) -> bool {
        false
    }

    fn chunk_size(&self) -> usize;

    fn backoff(&self) -> BackoffConfig;

    fn checkin_time(&self) -> Duration;

    /// Arrow indices downstream of this one, for activation propagation
    /// (spec §4.2 "Activation propagation").
    fn downstream(&self) -> &[usize];

    /// Number of still-active upstream arrows; starts at 1 for sources
    /// (spec §4.2: "themselves").
    fn active_upstream_count(&self) -> &CachePadded<AtomicUsize>;

    fn decrement_active_upstream(&self) -> usize {
        self.active_upstream_count().fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Whether this arrow's input is currently drained (used by
    /// finalization ordering, spec invariant 6).
    fn input_is_empty(&self) -> bool;

    fn ports(&self) -> Vec<Port>;

    /// Non-destructive readiness probe used by the scheduler's
    /// `next_assignment` scan (spec §4.4 step 3): true if input has items
    /// available (or, for a source, the pool has capacity) *and* outputs
    /// have reservation room. Approximate by design — the authoritative
    /// check is `fire`'s own `reserve`/`pop` calls; this only avoids
    /// handing a worker an assignment almost certain to backoff.
    fn ready_to_fire(&self) -> bool;

    fn open(&self, _ctx: &EngineContext) -> EngineResult<()> {
        Ok(())
    }

    /// The `Close` hook called once by `Scheduler::finalize` (spec §4.4).
    fn close(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Execute up to `chunk_size` events' worth of work in one call.
    fn fire(&self, worker: WorkerHandle) -> EngineResult<FireResult>;
}
