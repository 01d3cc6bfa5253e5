//! A minimal integer-carrying event source.

use arrowflow_core::context::EngineContext;
use arrowflow_core::errors::EngineResult;
use arrowflow_core::event::Event;
use arrowflow_core::interfaces::{EmitResult, EventSource};

/// Emits `total_events` events, each carrying a single `i64` under tag
/// `"x"`. `run_number_fn` decides the run number stamped on the *next*
/// event, defaulting to a single run covering the whole stream; pass
/// `with_run_boundary` to model a run transition partway through (spec
/// §8-S5).
pub struct IntSource {
    total_events: u64,
    x_value: i64,
    opened: bool,
    run_number_fn: Box<dyn Fn(u64) -> i64 + Send>,
}

impl IntSource {
    pub fn new(total_events: u64, x_value: i64) -> Self {
        IntSource { total_events, x_value, opened: false, run_number_fn: Box::new(|_| 0) }
    }

    /// A source not bounded by `nevents`: keeps emitting until the topology
    /// is told to drain. Used to regression-test the supervisor's
    /// excepted-worker-drains-the-topology path, where a finite source
    /// would mask the bug by finishing on its own.
    pub fn unbounded(x_value: i64) -> Self {
        IntSource::new(u64::MAX, x_value)
    }

    /// Events `1..=boundary` are stamped `run_before`; everything after is
    /// stamped `run_after`.
    pub fn with_run_boundary(mut self, boundary: u64, run_before: i64, run_after: i64) -> Self {
        self.run_number_fn = Box::new(move |n| if n <= boundary { run_before } else { run_after });
        self
    }
}

impl EventSource for IntSource {
    fn name(&self) -> &str {
        "int-source"
    }

    fn open(&mut self, _ctx: &EngineContext) -> EngineResult<()> {
        self.opened = true;
        Ok(())
    }

    fn run_number(&self, next_event_number: u64) -> i64 {
        (self.run_number_fn)(next_event_number)
    }

    fn emit(&mut self, event: &mut Event) -> EngineResult<EmitResult> {
        if event.event_number() > self.total_events {
            return Ok(EmitResult::FailureFinished);
        }
        event.insert("x", self.x_value);
        Ok(EmitResult::Success)
    }
}
