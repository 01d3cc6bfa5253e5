//! Source arrow: acquires Events from the Pool and runs the user's
//! `EventSource` (spec §4.2 "Source arrow").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::context::EngineContext;
use crate::errors::EngineResult;
use crate::event::{Event, Pool};
use crate::interfaces::{EmitResult, EventSource};
use crate::mailbox::Mailbox;

use super::arrow::{Arrow, BackoffConfig, FireResult, WorkerHandle};
use super::port::Port;

pub struct SourceArrow {
    name: String,
    source_id: usize,
    source: Mutex<Box<dyn EventSource>>,
    pool: Arc<Pool>,
    output: Arc<Mailbox<Event>>,
    downstream: Vec<usize>,
    active_upstream: CachePadded<AtomicUsize>,
    chunk_size: usize,
    backoff: BackoffConfig,
    checkin_time: Duration,
    /// `nskip`: events dropped before anything reaches downstream.
    nskip: u64,
    /// `nevents`: cap on events pushed downstream, `None` for unbounded.
    nevents: Option<u64>,
    next_event_number: AtomicU64,
    /// Count of events actually pushed downstream, i.e. past `nskip` and
    /// under the `nevents` cap — the quantity S3 calls `events_finished`.
    events_emitted: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl SourceArrow {
    pub fn new(name: impl Into<String>,
               source_id: usize,
               source: Box<dyn EventSource>,
               pool: Arc<Pool>,
               output: Arc<Mailbox<Event>>,
               downstream: Vec<usize>,
               chunk_size: usize,
               backoff: BackoffConfig,
               checkin_time: Duration,
               nskip: u64,
               nevents: Option<u64>)
               -> Self {
        SourceArrow { name: name.into(),
                      source_id,
                      source: Mutex::new(source),
                      pool,
                      output,
                      downstream,
                      active_upstream: CachePadded::new(AtomicUsize::new(1)),
                      chunk_size,
                      backoff,
                      checkin_time,
                      nskip,
                      nevents,
                      next_event_number: AtomicU64::new(1),
                      events_emitted: AtomicU64::new(0),
                      closed: std::sync::atomic::AtomicBool::new(false) }
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn cap_reached(&self) -> bool {
        matches!(self.nevents, Some(n) if self.events_emitted.load(Ordering::Acquire) >= n)
    }
}

impl Arrow for SourceArrow {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_parallel(&self) -> bool {
        false
    }

    fn is_source(&self) -> bool {
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
        true
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::PoolInput(self.pool.clone()), Port::MailboxOutput(self.output.clone())]
    }

    fn ready_to_fire(&self) -> bool {
        if self.cap_reached() {
            return true; // ready to report Finished
        }
        self.pool.size() > 0 && self.output.size() < self.output.capacity()
    }

    fn open(&self, ctx: &EngineContext) -> EngineResult<()> {
        self.source.lock().unwrap().open(ctx)
    }

    fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::Release);
        self.output.close();
        self.source.lock().unwrap().close()
    }

    fn fire(&self, worker: WorkerHandle) -> EngineResult<FireResult> {
        if self.cap_reached() {
            return Ok(FireResult::Finished);
        }

        let reserved = self.output.reserve(1);
        if reserved == 0 {
            return Ok(FireResult::ComeBackLater);
        }

        let Some(mut event) = self.pool.acquire(worker.location_id) else {
            self.output.release(reserved);
            return Ok(FireResult::ComeBackLater);
        };

        let event_number = self.next_event_number.fetch_add(1, Ordering::AcqRel);
        let mut source = self.source.lock().unwrap();
        let run_number = source.run_number(event_number);
        event.stamp(event_number, run_number, self.source_id);

        let outcome = source.emit(&mut event);
        drop(source);

        match outcome {
            Ok(EmitResult::Success) => {
                if let Err(e) = event.activate_configured() {
                    self.output.release(reserved);
                    self.pool.release(event, worker.location_id);
                    return Err(e);
                }
                if event_number <= self.nskip {
                    self.output.release(reserved);
                    self.pool.release(event, worker.location_id);
                    return Ok(FireResult::KeepGoing);
                }
                self.events_emitted.fetch_add(1, Ordering::AcqRel);
                self.output.push(std::iter::once(event), reserved);
                Ok(FireResult::KeepGoing)
            }
            Ok(EmitResult::FailureTryAgain) => {
                self.output.release(reserved);
                self.pool.release(event, worker.location_id);
                Ok(FireResult::ComeBackLater)
            }
            Ok(EmitResult::FailureFinished) => {
                self.output.release(reserved);
                self.pool.release(event, worker.location_id);
                Ok(FireResult::Finished)
            }
            Err(e) => {
                self.output.release(reserved);
                self.pool.release(event, worker.location_id);
                Err(e)
            }
        }
    }
}
