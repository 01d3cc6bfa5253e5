//! Unfold arrow: one parent event in, zero or more child events out, each
//! carrying one of the parent's unfolded payloads (spec §6 `Unfolder`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::errors::EngineResult;
use crate::event::{Event, Pool};
use crate::interfaces::Unfolder;
use crate::mailbox::{Mailbox, PopStatus};

use super::arrow::{Arrow, BackoffConfig, FireResult, WorkerHandle};
use super::port::Port;

/// Unlike `StageArrow`/`BroadcastArrow`, the number of outputs per input
/// isn't known until `unfold` runs, so reservation happens per child rather
/// than as one upfront batch. A child that can't get an output slot or a
/// fresh pool event is dropped rather than retried, mirroring
/// `BroadcastArrow`'s own pool-exhaustion compromise (spec's Suspension-
/// points invariant: never spin-wait inside `fire`).
pub struct UnfoldArrow {
    name: String,
    logic: Box<dyn Unfolder>,
    input: Arc<Mailbox<Event>>,
    output: Arc<Mailbox<Event>>,
    pool: Arc<Pool>,
    downstream: Vec<usize>,
    active_upstream: CachePadded<AtomicUsize>,
    chunk_size: usize,
    backoff: BackoffConfig,
    checkin_time: Duration,
    next_child_number: AtomicU64,
}

impl UnfoldArrow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(name: impl Into<String>,
               logic: Box<dyn Unfolder>,
               input: Arc<Mailbox<Event>>,
               output: Arc<Mailbox<Event>>,
               pool: Arc<Pool>,
               downstream: Vec<usize>,
               chunk_size: usize,
               backoff: BackoffConfig,
               checkin_time: Duration)
               -> Self {
        UnfoldArrow { name: name.into(),
                      logic,
                      input,
                      output,
                      pool,
                      downstream,
                      active_upstream: CachePadded::new(AtomicUsize::new(0)),
                      chunk_size,
                      backoff,
                      checkin_time,
                      next_child_number: AtomicU64::new(1) }
    }
}

impl Arrow for UnfoldArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn backoff(&self) -> BackoffConfig {
        self.backoff
    }

    fn checkin_time(&self) -> Duration {
        self.checkin_time
    }

    fn downstream(&self) -> &[usize] {
        &self.downstream
    }

    fn active_upstream_count(&self) -> &CachePadded<AtomicUsize> {
        &self.active_upstream
    }

    fn input_is_empty(&self) -> bool {
        self.input.is_empty()
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::MailboxInput(self.input.clone()),
             Port::MailboxOutput(self.output.clone()),
             Port::PoolInput(self.pool.clone()),
             Port::PoolOutput(self.pool.clone())]
    }

    fn close(&self) -> EngineResult<()> {
        self.output.close();
        Ok(())
    }

    fn ready_to_fire(&self) -> bool {
        !self.input.is_empty() || self.input.is_closed()
    }

    fn fire(&self, worker: WorkerHandle) -> EngineResult<FireResult> {
        let (status, taken) = self.input.pop(self.chunk_size);

        if taken.is_empty() {
            return if status == PopStatus::Closed && self.input_is_empty() {
                Ok(FireResult::Finished)
            } else {
                Ok(FireResult::ComeBackLater)
            };
        }

        let mut children_per_parent = Vec::with_capacity(taken.len());
        let mut first_error = None;
        for parent in &taken {
            match self.logic.unfold(parent) {
                Ok(children) => children_per_parent.push(children),
                Err(e) => {
                    first_error = Some(e);
                    break;
                }
            }
        }

        // A failed `unfold` leaves every popped parent (including ones not
        // yet reached) unaccounted for; return them all to the Pool before
        // propagating, same as Stage/Broadcast.
        if let Some(e) = first_error {
            for event in taken {
                self.pool.release(event, worker.location_id);
            }
            return Err(e);
        }

        for (parent, children) in taken.into_iter().zip(children_per_parent) {
            for payload in children {
                if self.output.reserve(1) == 0 {
                    continue;
                }
                let Some(mut child) = self.pool.acquire(worker.location_id) else {
                    self.output.release(1);
                    continue;
                };
                let child_number = self.next_child_number.fetch_add(1, Ordering::AcqRel);
                child.stamp_child(child_number, parent.run_number(), parent.source_id(), parent.event_number());
                child.factory_set_mut().insert_unfolded(payload);
                self.output.push(std::iter::once(child), 1);
            }
            self.pool.release(parent, worker.location_id);
        }

        Ok(FireResult::KeepGoing)
    }
}
