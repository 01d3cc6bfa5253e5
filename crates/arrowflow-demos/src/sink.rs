//! Demo sinks: aggregate, collect, or inspect what reached the end of the
//! pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arrowflow_core::errors::{EngineError, EngineResult};
use arrowflow_core::event::Event;
use arrowflow_core::interfaces::EventProcessor;

/// Sums an `i64` bundle across every event it sees.
pub struct SummingSink {
    pub tag: String,
    pub sum: Arc<Mutex<i64>>,
    pub count: Arc<AtomicU64>,
}

impl EventProcessor for SummingSink {
    fn name(&self) -> &str {
        "summing-sink"
    }

    fn process(&mut self, event: &Event) -> EngineResult<()> {
        let value: i64 = event.get::<i64>(&self.tag)
                              .ok_or_else(|| EngineError::MissingFactory { type_name: "i64".to_string(),
                                                                           tag: self.tag.clone() })?;
        *self.sum.lock().unwrap() += value;
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Records every event number it sees, in arrival order, for backpressure /
/// no-loss-no-duplication assertions (spec §8-S6).
pub struct CollectingSink {
    pub seen: Arc<Mutex<Vec<u64>>>,
}

impl EventProcessor for CollectingSink {
    fn name(&self) -> &str {
        "collecting-sink"
    }

    fn process(&mut self, event: &Event) -> EngineResult<()> {
        self.seen.lock().unwrap().push(event.event_number());
        Ok(())
    }
}

/// Records the per-event call-graph edge count just before the event is
/// recycled (`FactorySet::clear` wipes the recorder), so a test can assert
/// the recursion depth without racing the recycler (spec §8-S4).
pub struct CallGraphInspectingSink {
    pub edge_counts: Arc<Mutex<Vec<usize>>>,
}

impl EventProcessor for CallGraphInspectingSink {
    fn name(&self) -> &str {
        "callgraph-inspecting-sink"
    }

    fn process(&mut self, event: &Event) -> EngineResult<()> {
        let count = event.factory_set().callgraph().as_ref().map(|g| g.edge_count()).unwrap_or(0);
        self.edge_counts.lock().unwrap().push(count);
        Ok(())
    }
}
