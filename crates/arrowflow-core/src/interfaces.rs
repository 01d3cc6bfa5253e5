//! User-pluggable interfaces (spec §6).
//!
//! The legacy source threw status codes to signal end-of-stream or retry;
//! here that's an explicit sum type instead (spec §9 design note
//! "Exception-as-control-flow"). The exception channel (`EngineError`) is
//! reserved for truly unexpected failures.

use crate::context::EngineContext;
use crate::databundle::{FactoryContext, FactoryLogic, UnfoldedPayload};
use crate::errors::EngineResult;
use crate::event::Event;

/// Result of a source's `emit` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitResult {
    Success,
    FailureTryAgain,
    FailureFinished,
}

/// A source of events: the one arrow variant that acquires tokens from the
/// Pool rather than an upstream mailbox.
pub trait EventSource: Send {
    fn name(&self) -> &str;

    fn open(&mut self, _ctx: &EngineContext) -> EngineResult<()> {
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }

    /// Populate `event` (at minimum nothing — identity fields are stamped
    /// by the engine before this is called) and report whether another
    /// event is available.
    fn emit(&mut self, event: &mut Event) -> EngineResult<EmitResult>;

    /// Run number to stamp the next event with. Called before `emit`;
    /// defaults to a single run covering the whole stream.
    fn run_number(&self, _next_event_number: u64) -> i64 {
        0
    }

    /// Optional by-type supplier: lets the source hand the engine an
    /// already-computed bundle instead of letting a factory derive it
    /// (spec §4.1 step 4, §6 `get_objects`). Default: nothing supplied.
    fn get_objects(&mut self, _event: &mut Event) -> EngineResult<()> {
        Ok(())
    }

    /// Opt-in callback some sinks use to return processed events to the
    /// source (spec §9 Open Question — driven by `finish_event_enabled`).
    fn finish_event(&mut self, _event: &Event) -> EngineResult<()> {
        Ok(())
    }

    /// Whether the engine should call `finish_event` for this source. The
    /// original left this ambiguous; a per-source flag captures intent
    /// explicitly (see DESIGN.md).
    fn finish_event_enabled(&self) -> bool {
        false
    }
}

/// A sink: the one arrow variant that returns events to the Pool instead
/// of pushing to a downstream mailbox.
pub trait EventProcessor: Send {
    fn name(&self) -> &str;

    fn init(&mut self, _ctx: &EngineContext) -> EngineResult<()> {
        Ok(())
    }

    /// Invoked once per event, serialized under the arrow's own mutex when
    /// the arrow is non-parallel (spec §4.2 sink arrow).
    fn process(&mut self, event: &Event) -> EngineResult<()>;

    fn finish(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// A factory variant whose `process` may emit 0..N child events per
/// parent event (spec §6); children inherit a back-reference to the
/// parent for parent-level queries (`Event::parent_event_number`).
pub trait Unfolder: Send + Sync {
    fn name(&self) -> &str;

    /// Produce zero or more child payloads for one parent event. The
    /// engine is responsible for acquiring a pool event per payload,
    /// stamping it as a child, and routing it downstream — this hook only
    /// decides *what* the children are. Each payload carries its own tag and
    /// type metadata (`UnfoldedPayload::new`) since by the time `unfold`
    /// returns, the engine has no concrete type to key a fresh bundle slot
    /// by.
    fn unfold(&self, parent: &Event) -> EngineResult<Vec<UnfoldedPayload>>;
}

/// Blanket helper so a plain closure can serve as `FactoryLogic::process`
/// in tests and demos without a full struct definition.
pub struct FnFactory<F> {
    pub process_fn: F,
    pub regenerate: bool,
    pub persistent: bool,
}

impl<F> FactoryLogic for FnFactory<F>
    where F: Fn(FactoryContext<'_>) -> EngineResult<Box<dyn std::any::Any + Send>> + Send + Sync
{
    fn process(&self, ctx: FactoryContext<'_>) -> EngineResult<Box<dyn std::any::Any + Send>> {
        (self.process_fn)(ctx)
    }

    fn regenerate(&self) -> bool {
        self.regenerate
    }

    fn persistent(&self) -> bool {
        self.persistent
    }
}
