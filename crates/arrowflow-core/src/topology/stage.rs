//! Stage and Broadcast arrows: pop from upstream mailbox(es), run user
//! logic against the FactorySet, push downstream (spec §4.2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::errors::EngineResult;
use crate::event::{Event, Pool};
use crate::mailbox::{Mailbox, PopStatus};

use super::arrow::{Arrow, BackoffConfig, FireResult, WorkerHandle};
use super::port::Port;

/// User logic invoked once per event as it passes through a Stage. Typically
/// calls `event.get_or_create::<T>(tag)` to trigger (or reuse) a factory's
/// output; may also `event.insert(...)` directly.
pub trait StageLogic: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, event: &mut Event) -> EngineResult<()>;
}

/// Adapts a plain closure to `StageLogic`, for demos and tests.
pub struct FnStage<F> {
    pub label: String,
    pub process_fn: F,
}

impl<F> StageLogic for FnStage<F> where F: Fn(&mut Event) -> EngineResult<()> + Send + Sync
{
    fn name(&self) -> &str {
        &self.label
    }

    fn process(&self, event: &mut Event) -> EngineResult<()> {
        (self.process_fn)(event)
    }
}

/// Reserve capacity on every output, honoring the tie-break rule: the
/// minimum reservable count across outputs wins (spec §4.2). Returns the
/// agreed count, or `None` if any output has no room at all.
fn reserve_outputs(outputs: &[Arc<Mailbox<Event>>], want: usize) -> Option<usize> {
    if outputs.is_empty() {
        return Some(want);
    }
    let reservations: Vec<usize> = outputs.iter().map(|o| o.reserve(want)).collect();
    let k = reservations.iter().copied().min().unwrap_or(0);
    if k == 0 {
        for (o, r) in outputs.iter().zip(&reservations) {
            if *r > 0 {
                o.release(*r);
            }
        }
        return None;
    }
    for (o, r) in outputs.iter().zip(&reservations) {
        if *r > k {
            o.release(r - k);
        }
    }
    Some(k)
}

fn pop_up_to(inputs: &[Arc<Mailbox<Event>>], n: usize) -> (Vec<Event>, bool) {
    let mut taken = Vec::with_capacity(n);
    let mut saw_closed = false;
    for input in inputs {
        if taken.len() >= n {
            break;
        }
        let (status, mut items) = input.pop(n - taken.len());
        taken.append(&mut items);
        if status == PopStatus::Closed {
            saw_closed = true;
        }
    }
    (taken, saw_closed)
}

pub struct StageArrow {
    name: String,
    logic: Box<dyn StageLogic>,
    inputs: Vec<Arc<Mailbox<Event>>>,
    /// At most one output: a Stage forwards the same token it popped, and a
    /// single `Event` cannot be handed to two outputs at once. Fan-out
    /// belongs to `BroadcastArrow`, which acquires a fresh pool event per
    /// extra output instead of duplicating a token.
    output: Option<Arc<Mailbox<Event>>>,
    /// Needed only to return popped events on a `logic.process` failure —
    /// a Stage that forwards successfully never touches the Pool.
    pool: Arc<Pool>,
    downstream: Vec<usize>,
    active_upstream: CachePadded<AtomicUsize>,
    is_parallel: bool,
    chunk_size: usize,
    backoff: BackoffConfig,
    checkin_time: Duration,
}

impl StageArrow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(name: impl Into<String>,
               logic: Box<dyn StageLogic>,
               inputs: Vec<Arc<Mailbox<Event>>>,
               output: Option<Arc<Mailbox<Event>>>,
               pool: Arc<Pool>,
               downstream: Vec<usize>,
               is_parallel: bool,
               chunk_size: usize,
               backoff: BackoffConfig,
               checkin_time: Duration)
               -> Self {
        StageArrow { name: name.into(),
                     logic,
                     inputs,
                     output,
                     pool,
                     downstream,
                     active_upstream: CachePadded::new(AtomicUsize::new(0)),
                     is_parallel,
                     chunk_size,
                     backoff,
                     checkin_time }
    }
}

impl Arrow for StageArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        self.is_parallel
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
        self.inputs.iter().all(|i| i.is_empty())
    }

    fn ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self.inputs.iter().map(|m| Port::MailboxInput(m.clone())).collect();
        if let Some(o) = &self.output {
            ports.push(Port::MailboxOutput(o.clone()));
        }
        ports.push(Port::PoolOutput(self.pool.clone()));
        ports
    }

    fn close(&self) -> EngineResult<()> {
        if let Some(o) = &self.output {
            o.close();
        }
        Ok(())
    }

    fn ready_to_fire(&self) -> bool {
        let output_ready = self.output.as_ref().map(|o| o.size() < o.capacity()).unwrap_or(true);
        output_ready && self.inputs.iter().any(|i| !i.is_empty() || i.is_closed())
    }

    fn fire(&self, worker: WorkerHandle) -> EngineResult<FireResult> {
        let outputs = self.output.as_ref().map(std::slice::from_ref).unwrap_or(&[]);
        let Some(reserved) = reserve_outputs(outputs, self.chunk_size) else {
            return Ok(FireResult::ComeBackLater);
        };

        let (mut taken, saw_closed) = pop_up_to(&self.inputs, reserved);

        if taken.is_empty() {
            for o in outputs {
                o.release(reserved);
            }
            return if saw_closed && self.input_is_empty() {
                Ok(FireResult::Finished)
            } else {
                Ok(FireResult::ComeBackLater)
            };
        }

        let unused = reserved - taken.len();
        if unused > 0 {
            for o in outputs {
                o.release(unused);
            }
        }

        let mut first_error = None;
        for event in taken.iter_mut() {
            if let Err(e) = self.logic.process(event) {
                first_error = Some(e);
                break;
            }
        }

        // Whether this batch failed partway or not, every popped event must
        // be accounted for exactly once: on failure none of them are
        // forwarded, so they all go back to the Pool and the reservation
        // they'd have used is released.
        if let Some(e) = first_error {
            let n = taken.len();
            for event in taken {
                self.pool.release(event, worker.location_id);
            }
            for o in outputs {
                o.release(n);
            }
            return Err(e);
        }

        let n = taken.len();
        if let Some(o) = &self.output {
            o.push(taken, n);
        }

        Ok(FireResult::KeepGoing)
    }
}

/// Broadcast arrow: an N-output fan-out. Since an `Event` is a non-shared
/// token, "the same event" reaching every output (spec §4.2) is realized as
/// the original token going to the first output and a fresh pool-acquired
/// copy — stamped with the same identity and bundle contents — going to
/// each additional output.
pub struct BroadcastArrow {
    name: String,
    logic: Box<dyn StageLogic>,
    inputs: Vec<Arc<Mailbox<Event>>>,
    outputs: Vec<Arc<Mailbox<Event>>>,
    pool: Arc<Pool>,
    downstream: Vec<usize>,
    active_upstream: CachePadded<AtomicUsize>,
    is_parallel: bool,
    chunk_size: usize,
    backoff: BackoffConfig,
    checkin_time: Duration,
}

impl BroadcastArrow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(name: impl Into<String>,
               logic: Box<dyn StageLogic>,
               inputs: Vec<Arc<Mailbox<Event>>>,
               outputs: Vec<Arc<Mailbox<Event>>>,
               pool: Arc<Pool>,
               downstream: Vec<usize>,
               is_parallel: bool,
               chunk_size: usize,
               backoff: BackoffConfig,
               checkin_time: Duration)
               -> Self {
        BroadcastArrow { name: name.into(),
                         logic,
                         inputs,
                         outputs,
                         pool,
                         downstream,
                         active_upstream: CachePadded::new(AtomicUsize::new(0)),
                         is_parallel,
                         chunk_size,
                         backoff,
                         checkin_time }
    }
}

impl Arrow for BroadcastArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        self.is_parallel
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
        self.inputs.iter().all(|i| i.is_empty())
    }

    fn ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self.inputs.iter().map(|m| Port::MailboxInput(m.clone())).collect();
        ports.extend(self.outputs.iter().map(|m| Port::MailboxOutput(m.clone())));
        ports.push(Port::PoolOutput(self.pool.clone()));
        ports
    }

    fn close(&self) -> EngineResult<()> {
        for o in &self.outputs {
            o.close();
        }
        Ok(())
    }

    fn ready_to_fire(&self) -> bool {
        let output_ready = self.outputs.iter().all(|o| o.size() < o.capacity());
        output_ready && self.inputs.iter().any(|i| !i.is_empty() || i.is_closed())
    }

    fn fire(&self, worker: WorkerHandle) -> EngineResult<FireResult> {
        let Some(reserved) = reserve_outputs(&self.outputs, self.chunk_size) else {
            return Ok(FireResult::ComeBackLater);
        };

        let (mut taken, saw_closed) = pop_up_to(&self.inputs, reserved);

        if taken.is_empty() {
            for o in &self.outputs {
                o.release(reserved);
            }
            return if saw_closed && self.input_is_empty() {
                Ok(FireResult::Finished)
            } else {
                Ok(FireResult::ComeBackLater)
            };
        }

        let unused = reserved - taken.len();
        if unused > 0 {
            for o in &self.outputs {
                o.release(unused);
            }
        }

        let mut first_error = None;
        for event in taken.iter_mut() {
            if let Err(e) = self.logic.process(event) {
                first_error = Some(e);
                break;
            }
        }

        if let Some(e) = first_error {
            let n = taken.len();
            for event in taken {
                self.pool.release(event, worker.location_id);
            }
            for o in &self.outputs {
                o.release(n);
            }
            return Err(e);
        }

        for mut event in taken {
            // Make every extra output's copy first, then move the original
            // token into output 0 last (it's the only one that doesn't need
            // `event` to still be valid afterwards).
            for o in self.outputs.iter().skip(1) {
                if let Some(mut copy) = self.pool.acquire(worker.location_id) {
                    event.copy_into(&mut copy);
                    o.push(std::iter::once(copy), 1);
                } else {
                    // Pool exhausted mid-broadcast: drop this output's
                    // reservation rather than block; downstream sees one
                    // fewer fan-out copy for this event.
                    o.release(1);
                }
            }
            if let Some(o0) = self.outputs.first() {
                o0.push(std::iter::once(event), 1);
            }
        }

        Ok(FireResult::KeepGoing)
    }
}
