//! `Pool`: a bounded freelist of pre-allocated Events, segmented by
//! locality (spec §3, §4.3).

use std::sync::Arc;

use crate::context::EngineContext;
use crate::databundle::FactoryRegistry;
use crate::mailbox::{Mailbox, PopStatus};

use super::event::Event;

/// Same reserve/pop/close semantics as `Mailbox`, pre-loaded at startup
/// with exactly `max_inflight_events` Event instances and segmented by
/// `location_id` so a worker can preferentially recycle an event into the
/// NUMA domain it was processed in (spec §4.3 locality hints).
pub struct Pool {
    segments: Vec<Mailbox<Event>>,
    registry: Arc<FactoryRegistry>,
}

impl Pool {
    /// Build a pool with `max_inflight_events` Events distributed evenly
    /// across `segment_count` locality segments.
    pub fn new(max_inflight_events: usize,
               segment_count: usize,
               registry: Arc<FactoryRegistry>,
               ctx: EngineContext,
               record_callgraph: bool)
               -> Self {
        let segment_count = segment_count.max(1);
        let mut segments: Vec<Mailbox<Event>> =
            (0..segment_count).map(|loc| Mailbox::with_locality(max_inflight_events, loc)).collect();

        for i in 0..max_inflight_events {
            let seg = i % segment_count;
            let event = Event::new(registry.clone(), ctx.clone(), record_callgraph);
            let k = segments[seg].reserve(1);
            debug_assert_eq!(k, 1);
            segments[seg].push(std::iter::once(event), 1);
        }

        Pool { segments, registry }
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    pub fn max_inflight_events(&self) -> usize {
        self.segments.iter().map(|s| s.capacity()).sum()
    }

    pub fn size(&self) -> usize {
        self.segments.iter().map(|s| s.size()).sum()
    }

    /// Reserve+pop one event, preferring `preferred_segment`; falls back to
    /// stealing from other segments only when the preferred one is empty.
    pub fn acquire(&self, preferred_segment: usize) -> Option<Event> {
        let n = self.segments.len();
        let start = preferred_segment % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            let seg = &self.segments[idx];
            let (status, mut items) = seg.pop(1);
            if status == PopStatus::Ready {
                return items.pop();
            }
        }
        None
    }

    /// Return a recycled event to the pool, preferring the segment it was
    /// last processed in. At rest, `Σ segment.size() == max_inflight_events`
    /// (spec §4.3 invariant), so some segment always has room; this spins
    /// briefly across segments rather than blocking on a condvar.
    pub fn release(&self, mut event: Event, preferred_segment: usize) {
        event.recycle();
        let n = self.segments.len();
        let idx = preferred_segment % n;
        loop {
            for offset in 0..n {
                let seg = &self.segments[(idx + offset) % n];
                if seg.reserve(1) == 1 {
                    seg.push(std::iter::once(event), 1);
                    return;
                }
            }
            std::thread::yield_now();
        }
    }
}
