//! `FactorySet`: per-event lazy, recursive, memoized computation graph
//! (spec §3, §4.1).

use std::any::TypeId;
use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::context::EngineContext;
use crate::errors::{EngineError, EngineResult};

use super::bundle::{BundleKey, BundleStatus, Capabilities, Databundle, FactoryCreationStatus, UnfoldedPayload};
use super::callgraph::CallGraphRecorder;
use super::factory::{EventIdentity, FactoryContext, FactoryRegistry};

pub struct FactorySet {
    registry: Arc<FactoryRegistry>,
    ctx: EngineContext,
    slots: IndexMap<BundleKey, Databundle>,
    stack: RefCell<Vec<BundleKey>>,
    callgraph: RefCell<Option<CallGraphRecorder>>,
}

impl FactorySet {
    pub fn new(registry: Arc<FactoryRegistry>, ctx: EngineContext, record_callgraph: bool) -> Self {
        let mut slots = IndexMap::new();
        for (idx, d) in registry.descriptors().iter().enumerate() {
            let key = d.key();
            let bundle = Databundle::empty(d.tag.clone(),
                                            d.type_name,
                                            d.type_id,
                                            Some(idx),
                                            d.logic.persistent(),
                                            d.logic.not_object_owner(),
                                            d.logic.capabilities());
            slots.insert(key, bundle);
        }
        FactorySet { registry,
                     ctx,
                     slots,
                     stack: RefCell::new(Vec::new()),
                     callgraph: RefCell::new(record_callgraph.then(CallGraphRecorder::new)) }
    }

    /// Return an existing bundle without triggering computation.
    pub fn get<T: Clone + 'static>(&self, tag: &str) -> Option<T> {
        let key = BundleKey::new(TypeId::of::<T>(), tag);
        self.slots.get(&key).and_then(|b| b.downcast_clone::<T>())
    }

    pub fn get_bundle(&self, type_id: TypeId, tag: &str) -> Option<&Databundle> {
        self.slots.get(&BundleKey::new(type_id, tag))
    }

    /// Ensure the bundle exists (running `Init`/`ChangeRun`/`Process` as
    /// needed per spec §4.1) and return a clone of it. `Ok(None)` means no
    /// factory is registered for this (type, tag) and no externally-inserted
    /// bundle exists either.
    pub fn create_and_get<T: Clone + 'static>(&self, tag: &str, identity: EventIdentity) -> EngineResult<Option<T>> {
        let key = BundleKey::new(TypeId::of::<T>(), tag);
        match self.create_and_get_bundle(&key, identity)? {
            Some(bundle) => Ok(bundle.downcast_clone::<T>()),
            None => Ok(None),
        }
    }

    /// Same as `create_and_get` but resolved by `TypeId` (used by the call
    /// graph / introspection surface, where the caller may not have a
    /// concrete `T` at hand).
    pub fn create_and_get_bundle(&self, key: &BundleKey, identity: EventIdentity) -> EngineResult<Option<&Databundle>> {
        let Some(bundle) = self.slots.get(key) else {
            return Ok(None);
        };

        let already_done = !bundle.is_empty()
                           && matches!(bundle.creation_status(),
                                       FactoryCreationStatus::Created
                                       | FactoryCreationStatus::Inserted
                                       | FactoryCreationStatus::InsertedViaGetObjects)
                           && !self.regenerate_flag(bundle);
        if already_done {
            return Ok(Some(bundle));
        }

        let Some(idx) = bundle.factory_idx else {
            // Inserted-only slot with nothing inserted yet: no factory to
            // run, so there is nothing more we can do.
            return if bundle.is_empty() { Ok(None) } else { Ok(Some(bundle)) };
        };
        let factory = &self.registry.descriptors()[idx];

        if self.stack.borrow().contains(key) {
            return Err(EngineError::Config(format!("cycle detected requesting {}::{}", bundle.type_name, key.unique_name)));
        }

        if let Some(caller) = self.stack.borrow().last() {
            if let Some(recorder) = self.callgraph.borrow_mut().as_mut() {
                recorder.record(caller, key);
            }
        }
        self.stack.borrow_mut().push(key.clone());

        let outcome = self.run_lifecycle(bundle, factory, identity);

        self.stack.borrow_mut().pop();
        outcome?;
        Ok(Some(bundle))
    }

    fn regenerate_flag(&self, bundle: &Databundle) -> bool {
        bundle.factory_idx
              .map(|idx| self.registry.descriptors()[idx].logic.regenerate())
              .unwrap_or(false)
    }

    fn run_lifecycle(&self, bundle: &Databundle, factory: &super::factory::FactoryDescriptor, identity: EventIdentity)
                      -> EngineResult<()> {
        if bundle.creation_status() == FactoryCreationStatus::NotCreatedYet {
            factory.ensure_init(&self.ctx)?;
            bundle.creation_status.set(FactoryCreationStatus::Unprocessed);
        }

        factory.ensure_change_run(identity)?;

        let needs_process = matches!(bundle.creation_status(),
                                      FactoryCreationStatus::NotCreatedYet | FactoryCreationStatus::Unprocessed)
                             || factory.logic.regenerate();

        if needs_process {
            let ctx = FactoryContext::new(identity, self);
            match factory.process(ctx) {
                Ok(payload) => {
                    bundle.set_payload(payload);
                    bundle.status.set(BundleStatus::Created);
                    bundle.creation_status.set(FactoryCreationStatus::Created);
                }
                Err(e) => {
                    bundle.creation_status.set(FactoryCreationStatus::Unprocessed);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Register an externally-produced bundle (spec §4.1 `insert`).
    pub fn insert<T: 'static + Send>(&mut self, tag: impl Into<String>, value: T) {
        self.insert_status(tag, value, Capabilities::NONE, FactoryCreationStatus::Inserted)
    }

    pub fn insert_with<T: 'static + Send>(&mut self, tag: impl Into<String>, value: T, capabilities: Capabilities) {
        self.insert_status(tag, value, capabilities, FactoryCreationStatus::Inserted)
    }

    /// Register a bundle supplied by the source's by-type `get_objects`
    /// hook (spec §4.1 step 4): marks the bundle `InsertedViaGetObjects` so
    /// `create_and_get` skips `Process` for it this event.
    pub fn insert_via_get_objects<T: 'static + Send>(&mut self, tag: impl Into<String>, value: T) {
        self.insert_status(tag, value, Capabilities::NONE, FactoryCreationStatus::InsertedViaGetObjects)
    }

    fn insert_status<T: 'static + Send>(&mut self,
                                         tag: impl Into<String>,
                                         value: T,
                                         capabilities: Capabilities,
                                         status: FactoryCreationStatus) {
        self.insert_erased(tag.into(),
                            TypeId::of::<T>(),
                            std::any::type_name::<T>(),
                            Box::new(value),
                            capabilities,
                            status);
    }

    /// Type-erased core of `insert_status`: takes the type metadata
    /// directly rather than via a generic, for callers (like `UnfoldArrow`)
    /// that only hold an already-erased payload.
    fn insert_erased(&mut self,
                      tag: String,
                      type_id: TypeId,
                      type_name: &'static str,
                      value: Box<dyn std::any::Any + Send>,
                      capabilities: Capabilities,
                      status: FactoryCreationStatus) {
        let key = BundleKey::new(type_id, tag.clone());
        let bundle = self.slots
                          .entry(key)
                          .or_insert_with(|| Databundle::empty(tag, type_name, type_id, None, false, false, capabilities));
        bundle.set_payload(value);
        bundle.status.set(BundleStatus::Inserted);
        bundle.creation_status.set(status);
    }

    /// Register a child payload produced by an `Unfolder` (spec §6),
    /// without requiring a concrete `T` at the call site.
    pub fn insert_unfolded(&mut self, payload: UnfoldedPayload) {
        self.insert_erased(payload.tag,
                            payload.type_id,
                            payload.type_name,
                            payload.value,
                            Capabilities::NONE,
                            FactoryCreationStatus::Inserted);
    }

    /// Force-create every (type, tag) pair the engine config names in its
    /// `autoactivate` list (spec §6), regardless of whether anything
    /// downstream has asked for it yet.
    pub fn activate_configured(&self, identity: EventIdentity) -> EngineResult<()> {
        for descriptor in self.registry.descriptors() {
            if self.ctx.is_autoactivated(descriptor.type_name, &descriptor.tag) {
                self.create_and_get_bundle(&descriptor.key(), identity)?;
            }
        }
        Ok(())
    }

    /// Prepare for recycling: clear every non-persistent bundle (spec §4.1
    /// clearing policy, invariant 8).
    pub fn clear(&mut self) {
        for bundle in self.slots.values_mut() {
            bundle.clear();
        }
        if let Some(recorder) = self.callgraph.borrow_mut().as_mut() {
            recorder.clear();
        }
    }

    pub fn callgraph(&self) -> std::cell::Ref<'_, Option<CallGraphRecorder>> {
        self.callgraph.borrow()
    }

    /// All bundles currently known to this FactorySet, for introspection.
    pub fn iter_bundles(&self) -> impl Iterator<Item = &Databundle> {
        self.slots.values()
    }
}
