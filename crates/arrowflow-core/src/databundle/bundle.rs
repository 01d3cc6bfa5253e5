//! `Databundle`: a tagged, typed collection carrier (spec §3).

use std::any::TypeId;
use std::cell::{Cell, RefCell};

/// Lifecycle status of the data a Databundle carries (spec §3: Empty,
/// Created, Inserted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    Empty,
    Created,
    Inserted,
}

/// Per-factory lifecycle status, gating `Init`/`ChangeRun`/`Process`
/// invocation (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryCreationStatus {
    NotCreatedYet,
    Unprocessed,
    Created,
    Inserted,
    InsertedViaGetObjects,
    NeverCreated,
}

/// Capability flags a bundle's payload exposes, replacing the deep
/// inheritance the original source used (spec §9 design note). A bundle may
/// advertise any combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const SERIALIZABLE: Capabilities = Capabilities(1 << 0);
    pub const SUMMARIZABLE: Capabilities = Capabilities(1 << 1);
    pub const RENDERABLE: Capabilities = Capabilities(1 << 2);

    pub fn with(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }

    pub fn has(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Identifies a Databundle within one FactorySet: `(type_id, unique_name)`
/// must be unique per event (spec §3 invariant).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleKey {
    pub type_id: TypeId,
    pub unique_name: String,
}

impl BundleKey {
    pub fn new(type_id: TypeId, unique_name: impl Into<String>) -> Self {
        BundleKey { type_id, unique_name: unique_name.into() }
    }
}

/// A typed, tagged collection associated with one event.
///
/// The payload is type-erased (`Box<dyn Any + Send>`) behind a `RefCell` so
/// a `regenerate` factory can replace it in place; callers retrieve their
/// data by cloning it out (`Databundle::downcast_clone`), which is why
/// factory outputs are conventionally cheap-to-clone collections (e.g. an
/// `Arc<Vec<T>>`) rather than the raw collection itself.
pub struct Databundle {
    pub unique_name: String,
    pub type_name: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) status: Cell<BundleStatus>,
    pub(crate) creation_status: Cell<FactoryCreationStatus>,
    pub persistent: bool,
    pub not_owner: bool,
    pub capabilities: Capabilities,
    /// Index into the owning `FactoryRegistry`, or `None` for a bundle that
    /// only ever arrives via `FactorySet::insert`.
    pub(crate) factory_idx: Option<usize>,
    pub(crate) payload: RefCell<Option<Box<dyn std::any::Any + Send>>>,
}

impl Databundle {
    pub(crate) fn empty(unique_name: impl Into<String>,
                         type_name: &'static str,
                         type_id: TypeId,
                         factory_idx: Option<usize>,
                         persistent: bool,
                         not_owner: bool,
                         capabilities: Capabilities)
                         -> Self {
        Databundle { unique_name: unique_name.into(),
                     type_name,
                     type_id,
                     status: Cell::new(BundleStatus::Empty),
                     creation_status: Cell::new(FactoryCreationStatus::NotCreatedYet),
                     persistent,
                     not_owner,
                     capabilities,
                     factory_idx,
                     payload: RefCell::new(None) }
    }

    pub fn key(&self) -> BundleKey {
        BundleKey::new(self.type_id, self.unique_name.clone())
    }

    pub fn status(&self) -> BundleStatus {
        self.status.get()
    }

    pub fn creation_status(&self) -> FactoryCreationStatus {
        self.creation_status.get()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.borrow().is_none()
    }

    pub(crate) fn downcast_clone<T: Clone + 'static>(&self) -> Option<T> {
        self.payload.borrow().as_ref().and_then(|b| b.downcast_ref::<T>()).cloned()
    }

    pub(crate) fn set_payload(&self, value: Box<dyn std::any::Any + Send>) {
        *self.payload.borrow_mut() = Some(value);
    }

    /// Clear this bundle's output per the persistence policy (spec §4.1
    /// clearing table).
    ///
    /// | persistent | not_owner | action |
    /// |---|---|---|
    /// | false | false | drop objects; reset status |
    /// | false | true  | drop objects; reset status (ownership was never ours) |
    /// | true  | any   | keep objects and status |
    pub(crate) fn clear(&mut self) {
        if self.persistent {
            return;
        }
        self.payload.get_mut().take();
        self.status.set(BundleStatus::Empty);
        self.creation_status.set(FactoryCreationStatus::NotCreatedYet);
    }
}

/// A child payload produced by an `Unfolder` (spec §6), captured generically
/// at construction so the type metadata a fresh bundle slot needs
/// (`TypeId`, `type_name`) survives past the point where the value itself
/// gets erased behind `Box<dyn Any + Send>`.
pub struct UnfoldedPayload {
    pub(crate) tag: String,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) value: Box<dyn std::any::Any + Send>,
}

impl UnfoldedPayload {
    pub fn new<T: Send + 'static>(tag: impl Into<String>, value: T) -> Self {
        UnfoldedPayload { tag: tag.into(),
                          type_id: TypeId::of::<T>(),
                          type_name: std::any::type_name::<T>(),
                          value: Box::new(value) }
    }
}

impl std::fmt::Debug for Databundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Databundle")
         .field("unique_name", &self.unique_name)
         .field("type_name", &self.type_name)
         .field("status", &self.status.get())
         .field("creation_status", &self.creation_status.get())
         .field("persistent", &self.persistent)
         .field("not_owner", &self.not_owner)
         .finish()
    }
}
