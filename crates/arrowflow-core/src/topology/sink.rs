//! Sink arrow: consumes events, runs the user's `EventProcessor` under the
//! arrow's own mutex, returns the event to the Pool (spec §4.2 "Sink
//! arrow").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::errors::EngineResult;
use crate::event::{Event, Pool};
use crate::interfaces::EventProcessor;
use crate::mailbox::{Mailbox, PopStatus};

use super::arrow::{Arrow, BackoffConfig, FireResult, WorkerHandle};
use super::port::Port;

pub struct SinkArrow {
    name: String,
    processor: Mutex<Box<dyn EventProcessor>>,
    input: Arc<Mailbox<Event>>,
    pool: Arc<Pool>,
    active_upstream: CachePadded<AtomicUsize>,
    chunk_size: usize,
    backoff: BackoffConfig,
    checkin_time: Duration,
}

impl SinkArrow {
    pub fn new(name: impl Into<String>,
               processor: Box<dyn EventProcessor>,
               input: Arc<Mailbox<Event>>,
               pool: Arc<Pool>,
               chunk_size: usize,
               backoff: BackoffConfig,
               checkin_time: Duration)
               -> Self {
        SinkArrow { name: name.into(),
                    processor: Mutex::new(processor),
                    input,
                    pool,
                    active_upstream: CachePadded::new(AtomicUsize::new(0)),
                    chunk_size,
                    backoff,
                    checkin_time }
    }
}

impl Arrow for SinkArrow {
    fn name(&self) -> &str {
        &self.name
    }

    /// Sinks are non-parallel by construction: spec §5 requires ordered
    /// aggregation to declare `is_parallel=false`, and this port models
    /// only the single-instance serialized-reduction case of §4.2.
    fn is_parallel(&self) -> bool {
        false
    }

    fn is_sink(&self) -> bool {
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
        &[]
    }

    fn active_upstream_count(&self) -> &CachePadded<AtomicUsize> {
        &self.active_upstream
    }

    fn input_is_empty(&self) -> bool {
        self.input.is_empty()
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::MailboxInput(self.input.clone()), Port::PoolOutput(self.pool.clone())]
    }

    fn ready_to_fire(&self) -> bool {
        !self.input.is_empty() || self.input.is_closed()
    }

    fn open(&self, ctx: &crate::context::EngineContext) -> EngineResult<()> {
        self.processor.lock().unwrap().init(ctx)
    }

    fn close(&self) -> EngineResult<()> {
        self.processor.lock().unwrap().finish()
    }

    fn fire(&self, worker: WorkerHandle) -> EngineResult<FireResult> {
        let (status, items) = self.input.pop(self.chunk_size);

        if items.is_empty() {
            return if status == PopStatus::Closed {
                Ok(FireResult::Finished)
            } else {
                Ok(FireResult::ComeBackLater)
            };
        }

        let mut processor = self.processor.lock().unwrap();
        let mut first_error = None;
        for event in &items {
            if let Err(e) = processor.process(event) {
                first_error = Some(e);
                break;
            }
        }
        drop(processor);

        for event in items {
            self.pool.release(event, worker.location_id);
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(FireResult::KeepGoing)
    }
}
