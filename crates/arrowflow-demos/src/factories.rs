//! Demo factories exercising the lazy, recursive, memoized per-event graph.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrowflow_core::context::EngineContext;
use arrowflow_core::databundle::{EventIdentity, FactoryContext, FactoryLogic};
use arrowflow_core::errors::{EngineError, EngineResult};

/// Counts how many times each lifecycle hook actually ran, independent of
/// how many times a stage *requested* the bundle — lets a test assert
/// memoization (`process_calls == events_processed`) without peeking at
/// engine internals.
#[derive(Default)]
pub struct FactoryCounters {
    pub init_calls: AtomicUsize,
    pub change_run_calls: AtomicUsize,
    pub process_calls: AtomicUsize,
}

impl FactoryCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::Relaxed)
    }

    pub fn change_run_calls(&self) -> usize {
        self.change_run_calls.load(Ordering::Relaxed)
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::Relaxed)
    }
}

/// Computes `tag` as `transform(upstream_tag)`. Chaining several of these,
/// each depending on the previous one's tag, builds a recursive factory
/// graph of arbitrary depth purely through wiring — no arrow needs to know
/// about the intermediate tags, since `create_and_get` walks the chain.
pub struct ChainFactory {
    pub upstream_tag: String,
    pub transform: fn(i64) -> i64,
    pub counters: Arc<FactoryCounters>,
}

impl FactoryLogic for ChainFactory {
    fn init(&self, _ctx: &EngineContext) -> EngineResult<()> {
        self.counters.init_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn change_run(&self, _identity: EventIdentity) -> EngineResult<()> {
        self.counters.change_run_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn process(&self, ctx: FactoryContext<'_>) -> EngineResult<Box<dyn Any + Send>> {
        self.counters.process_calls.fetch_add(1, Ordering::Relaxed);
        let upstream: i64 = ctx.get_or_create::<i64>(&self.upstream_tag)?
                                .ok_or_else(|| {
                                    EngineError::MissingFactory { type_name: "i64".to_string(),
                                                                  tag: self.upstream_tag.clone() }
                                })?;
        Ok(Box::new((self.transform)(upstream)))
    }
}

/// A factory that throws on one specific event number, carrying enough
/// context for S7-style assertions on the enriched error (factory name,
/// tag, plugin, worker id, event number all survive to the top level).
pub struct FailingFactory {
    pub upstream_tag: String,
    pub fail_on_event: u64,
}

impl FactoryLogic for FailingFactory {
    fn process(&self, ctx: FactoryContext<'_>) -> EngineResult<Box<dyn Any + Send>> {
        if ctx.event_number() == self.fail_on_event {
            return Err(EngineError::Config(format!("synthetic failure on event {}", self.fail_on_event)));
        }
        let upstream: i64 = ctx.get_or_create::<i64>(&self.upstream_tag)?.unwrap_or_default();
        Ok(Box::new(upstream))
    }
}
