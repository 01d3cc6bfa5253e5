//! `Factory`: a polymorphic producer of one databundle, lazily invoked on
//! demand (spec §3, §4.1, §6).

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use crate::context::EngineContext;
use crate::errors::{EngineError, EngineResult};

use super::bundle::{BundleKey, Capabilities};
use super::factory_set::FactorySet;

/// Per-event identity a factory's hooks need. Kept as plain `Copy` scalars
/// (rather than a borrow of the whole `Event`) so `FactorySet` can expose
/// `create_and_get` as `&self` and recurse freely without fighting the
/// borrow checker over a shared `Event`.
#[derive(Debug, Clone, Copy)]
pub struct EventIdentity {
    pub event_number: u64,
    pub run_number: i64,
}

/// Handed to `FactoryLogic::process` so it can pull other bundles from the
/// same event's FactorySet (spec §4.1 "Re-entrancy"). Borrows the
/// FactorySet rather than owning it — recursion bottoms out within one
/// `create_and_get` call, never escapes it.
#[derive(Clone, Copy)]
pub struct FactoryContext<'a> {
    pub identity: EventIdentity,
    factory_set: &'a FactorySet,
}

impl<'a> FactoryContext<'a> {
    pub(crate) fn new(identity: EventIdentity, factory_set: &'a FactorySet) -> Self {
        FactoryContext { identity, factory_set }
    }

    /// Recursively resolve another bundle in the same event, running its
    /// factory's lifecycle if it hasn't already (spec §4.1 `create_and_get`).
    pub fn get_or_create<T: Clone + 'static>(&self, tag: &str) -> EngineResult<Option<T>> {
        self.factory_set.create_and_get::<T>(tag, self.identity)
    }

    pub fn event_number(&self) -> u64 {
        self.identity.event_number
    }

    pub fn run_number(&self) -> i64 {
        self.identity.run_number
    }
}

/// User-supplied production logic for one databundle type.
///
/// Mirrors the `Factory` interface in spec §6: `init` (once), `change_run`
/// (on run transition), `process` (per event).
pub trait FactoryLogic: Send + Sync {
    fn init(&self, _ctx: &EngineContext) -> EngineResult<()> {
        Ok(())
    }

    fn change_run(&self, _identity: EventIdentity) -> EngineResult<()> {
        Ok(())
    }

    /// Produce the payload for one event. May call `ctx.get_or_create`
    /// to pull other bundles this factory depends on (spec §4.1
    /// "Re-entrancy").
    fn process(&self, ctx: FactoryContext<'_>) -> EngineResult<Box<dyn Any + Send>>;

    fn regenerate(&self) -> bool {
        false
    }

    fn persistent(&self) -> bool {
        false
    }

    fn not_object_owner(&self) -> bool {
        false
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    /// Symmetric with `Arrow::close`: called once, at topology finalization,
    /// after every factory has seen its last event (spec §4.4 "call
    /// Finalize on every arrow and every factory").
    fn finalize(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// Static description of a registered factory: identity plus the shared
/// (cross-event) lifecycle state that makes `Init` run exactly once and
/// `ChangeRun` fire only on an actual run transition.
pub struct FactoryDescriptor {
    pub object_name: String,
    pub tag: String,
    pub plugin_name: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub logic: Box<dyn FactoryLogic>,
    init_done: AtomicBool,
    init_guard: Mutex<()>,
    last_run_number: AtomicI64,
    run_guard: Mutex<()>,
}

impl FactoryDescriptor {
    pub fn new(object_name: impl Into<String>,
               tag: impl Into<String>,
               plugin_name: impl Into<String>,
               type_id: TypeId,
               type_name: &'static str,
               logic: Box<dyn FactoryLogic>)
               -> Self {
        FactoryDescriptor { object_name: object_name.into(),
                            tag: tag.into(),
                            plugin_name: plugin_name.into(),
                            type_id,
                            type_name,
                            logic,
                            init_done: AtomicBool::new(false),
                            init_guard: Mutex::new(()),
                            last_run_number: AtomicI64::new(-1),
                            run_guard: Mutex::new(()) }
    }

    pub fn key(&self) -> BundleKey {
        BundleKey::new(self.type_id, self.tag.clone())
    }

    /// First-touch-wins `Init`, guarded so two worker threads racing to
    /// touch the same factory on different events don't both run it
    /// (spec §5: "Factory `Init` runs exactly once; first-touch wins under
    /// the FactorySet's internal guard").
    pub(crate) fn ensure_init(&self, ctx: &EngineContext) -> EngineResult<()> {
        if self.init_done.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_guard.lock().unwrap();
        if self.init_done.load(Ordering::Acquire) {
            return Ok(());
        }
        self.logic.init(ctx).map_err(|e| {
                               EngineError::InitializationFailure { component: "factory",
                                                                    name: self.object_name.clone(),
                                                                    message: e.to_string() }
                           })?;
        self.init_done.store(true, Ordering::Release);
        Ok(())
    }

    /// Invoke `change_run` exactly when the event's run number differs from
    /// the last one this factory observed (spec §4.1 step 2, invariant 4).
    pub(crate) fn ensure_change_run(&self, identity: EventIdentity) -> EngineResult<()> {
        let _guard = self.run_guard.lock().unwrap();
        if self.last_run_number.load(Ordering::Acquire) == identity.run_number {
            return Ok(());
        }
        self.logic.change_run(identity).map_err(|e| {
                                        EngineError::runtime_factory(&self.object_name,
                                                                      &self.tag,
                                                                      &self.plugin_name,
                                                                      identity.event_number,
                                                                      e.to_string())
                                    })?;
        self.last_run_number.store(identity.run_number, Ordering::Release);
        Ok(())
    }

    pub(crate) fn process(&self, ctx: FactoryContext<'_>) -> EngineResult<Box<dyn Any + Send>> {
        let event_number = ctx.identity.event_number;
        self.logic.process(ctx).map_err(|e| {
                                 EngineError::runtime_factory(&self.object_name,
                                                               &self.tag,
                                                               &self.plugin_name,
                                                               event_number,
                                                               e.to_string())
                             })
    }
}

impl std::fmt::Debug for FactoryDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryDescriptor")
         .field("object_name", &self.object_name)
         .field("tag", &self.tag)
         .field("plugin_name", &self.plugin_name)
         .field("type_name", &self.type_name)
         .finish()
    }
}

/// The set of factory descriptors registered for a topology, shared
/// (read-only after construction) across every event's `FactorySet`.
#[derive(Debug, Default)]
pub struct FactoryRegistry {
    descriptors: Vec<FactoryDescriptor>,
}

impl FactoryRegistry {
    pub fn builder() -> FactoryRegistryBuilder {
        FactoryRegistryBuilder::default()
    }

    pub fn descriptors(&self) -> &[FactoryDescriptor] {
        &self.descriptors
    }

    pub fn find(&self, type_id: TypeId, tag: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.type_id == type_id && d.tag == tag)
    }

    pub fn by_type(&self, type_id: TypeId) -> impl Iterator<Item = &FactoryDescriptor> {
        self.descriptors.iter().filter(move |d| d.type_id == type_id)
    }

    /// Call every registered factory's `Finalize` hook (spec §4.4), in
    /// registration order. Stops and returns the first error rather than
    /// running the rest, matching how `open_topology` treats a failing
    /// arrow hook.
    pub fn finalize_all(&self) -> EngineResult<()> {
        for d in &self.descriptors {
            d.logic.finalize()?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FactoryRegistryBuilder {
    descriptors: Vec<FactoryDescriptor>,
}

impl FactoryRegistryBuilder {
    pub fn register<T: 'static>(mut self,
                                 object_name: impl Into<String>,
                                 tag: impl Into<String>,
                                 plugin_name: impl Into<String>,
                                 logic: impl FactoryLogic + 'static)
                                 -> Self {
        self.descriptors.push(FactoryDescriptor::new(object_name,
                                                      tag,
                                                      plugin_name,
                                                      TypeId::of::<T>(),
                                                      std::any::type_name::<T>(),
                                                      Box::new(logic)));
        self
    }

    pub fn build(self) -> FactoryRegistry {
        FactoryRegistry { descriptors: self.descriptors }
    }
}
