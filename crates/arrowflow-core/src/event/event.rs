//! `Event`: an opaque, recyclable carrier of a FactorySet plus identifiers
//! (spec §3).

use std::sync::Arc;

use crate::context::EngineContext;
use crate::databundle::{EventIdentity, FactoryRegistry, FactorySet};

/// A single unit of work flowing through the dataflow graph.
///
/// Ownership of an `Event` is a token: exactly one arrow's worker holds it
/// at any instant (spec §3: "Events are never shared across
/// concurrently-executing arrows"), so nothing inside `Event` needs to be
/// `Sync`; it only needs to be `Send` so it can move between worker
/// threads across mailbox hops.
pub struct Event {
    event_number: u64,
    run_number: i64,
    source_id: usize,
    factory_set: FactorySet,
    /// Set when this event is a child emitted by an `Unfolder` (spec §6);
    /// lets parent-level queries walk back up.
    parent_event_number: Option<u64>,
}

impl Event {
    pub(crate) fn new(registry: Arc<FactoryRegistry>, ctx: EngineContext, record_callgraph: bool) -> Self {
        Event { event_number: 0,
                run_number: -1,
                source_id: usize::MAX,
                factory_set: FactorySet::new(registry, ctx, record_callgraph),
                parent_event_number: None }
    }

    /// Stamp identifying fields; called by the source arrow when it
    /// acquires a fresh event from the pool (spec §4.2).
    pub fn stamp(&mut self, event_number: u64, run_number: i64, source_id: usize) {
        self.event_number = event_number;
        self.run_number = run_number;
        self.source_id = source_id;
        self.parent_event_number = None;
    }

    pub fn stamp_child(&mut self, event_number: u64, run_number: i64, source_id: usize, parent_event_number: u64) {
        self.stamp(event_number, run_number, source_id);
        self.parent_event_number = Some(parent_event_number);
    }

    pub fn event_number(&self) -> u64 {
        self.event_number
    }

    pub fn run_number(&self) -> i64 {
        self.run_number
    }

    pub fn source_id(&self) -> usize {
        self.source_id
    }

    pub fn parent_event_number(&self) -> Option<u64> {
        self.parent_event_number
    }

    pub fn identity(&self) -> EventIdentity {
        EventIdentity { event_number: self.event_number, run_number: self.run_number }
    }

    pub fn factory_set(&self) -> &FactorySet {
        &self.factory_set
    }

    pub fn factory_set_mut(&mut self) -> &mut FactorySet {
        &mut self.factory_set
    }

    /// Lazily resolve a typed, tagged bundle, recursing into whatever
    /// factories it depends on (spec §4.1 `create_and_get`).
    pub fn get_or_create<T: Clone + 'static>(&self, tag: &str) -> crate::errors::EngineResult<Option<T>> {
        self.factory_set.create_and_get::<T>(tag, self.identity())
    }

    /// Return an existing bundle without triggering computation.
    pub fn get<T: Clone + 'static>(&self, tag: &str) -> Option<T> {
        self.factory_set.get::<T>(tag)
    }

    /// Register an externally-produced bundle (e.g. a source's own
    /// output), spec §4.1 `insert`.
    pub fn insert<T: 'static + Send>(&mut self, tag: impl Into<String>, value: T) {
        self.factory_set.insert(tag, value);
    }

    /// Force-create every (type, tag) pair named in the engine's
    /// `autoactivate` config (spec §6), called once per event right after a
    /// source emits it.
    pub(crate) fn activate_configured(&self) -> crate::errors::EngineResult<()> {
        let identity = self.identity();
        self.factory_set.activate_configured(identity)
    }

    /// Stamp `target` with this event's identity for a Broadcast arrow's
    /// fan-out copies (spec §4.2 "Broadcast arrow"). `target`'s own
    /// FactorySet starts empty: each fan-out branch re-derives whatever
    /// bundles it needs through its own factories rather than sharing
    /// payloads, since a payload's type is erased behind `Box<dyn Any>` and
    /// cannot be generically cloned without a per-type registration the
    /// engine doesn't ask factories for (see DESIGN.md).
    pub(crate) fn copy_into(&self, target: &mut Event) {
        target.event_number = self.event_number;
        target.run_number = self.run_number;
        target.source_id = self.source_id;
        target.parent_event_number = self.parent_event_number;
    }

    /// Reset for recycling: clears all non-persistent bundles (spec §4.1
    /// `clear`, invariant 8).
    pub(crate) fn recycle(&mut self) {
        self.factory_set.clear();
        self.event_number = 0;
        self.run_number = -1;
        self.source_id = usize::MAX;
        self.parent_event_number = None;
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
         .field("event_number", &self.event_number)
         .field("run_number", &self.run_number)
         .field("source_id", &self.source_id)
         .finish()
    }
}
