//! Ordered registry of active instance sets.
//!
//! The pipeline owns one [`RendererRegistry`] and walks it once per frame to
//! draw every set that is not self-scheduled. Sets keep a weak handle to the
//! registry they joined so releasing a set always unregisters it.
//!
//! Locking order is registry first, set second, and the registry lock is
//! never held while a set is locked by a callback. Callers must not hold a
//! set's lock when registering or unregistering it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::instance_set::{InstanceSetId, RenderableInstanceSet};

/// An instance set shared between its owner and the registry.
pub type SharedInstanceSet = Arc<Mutex<RenderableInstanceSet>>;

/// Wrap a set for registration.
pub fn share(set: RenderableInstanceSet) -> SharedInstanceSet {
    Arc::new(Mutex::new(set))
}

#[derive(Debug)]
struct Entry {
    id: InstanceSetId,
    set: SharedInstanceSet,
}

#[derive(Debug, Default)]
pub struct RendererRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl RendererRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a set. Registering a set that is already present does nothing.
    ///
    /// Returns whether the set was added.
    pub fn register(self: &Arc<Self>, set: &SharedInstanceSet) -> bool {
        let id = {
            let mut guard = set.lock();
            guard.attach_registry(Arc::downgrade(self));
            guard.id()
        };

        let mut entries = self.entries.lock();
        if entries.iter().any(|entry| Arc::ptr_eq(&entry.set, set)) {
            return false;
        }
        entries.push(Entry {
            id,
            set: set.clone(),
        });
        debug!(set = %id, count = entries.len(), "Registered instance set");
        true
    }

    /// Remove a set by identity. Removing an absent set does nothing.
    ///
    /// Returns whether the set was present.
    pub fn unregister(&self, set: &SharedInstanceSet) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|entry| !Arc::ptr_eq(&entry.set, set));
            entries.len() != before
        };
        if removed {
            set.lock().detach_registry();
        }
        removed
    }

    /// Remove a set by id, for use while that set is already locked.
    pub fn unregister_id(&self, id: InstanceSetId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            debug!(set = %id, count = entries.len(), "Unregistered instance set");
        }
        removed
    }

    pub fn contains(&self, set: &SharedInstanceSet) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| Arc::ptr_eq(&entry.set, set))
    }

    pub fn contains_id(&self, id: InstanceSetId) -> bool {
        self.entries.lock().iter().any(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The registered sets, in registration order.
    pub fn snapshot(&self) -> Vec<SharedInstanceSet> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.set.clone())
            .collect()
    }

    /// Visit every set in registration order.
    ///
    /// Iterates over a snapshot, so `f` may release or unregister sets.
    pub fn for_each(&self, mut f: impl FnMut(&mut RenderableInstanceSet)) {
        for set in self.snapshot() {
            f(&mut set.lock());
        }
    }

    /// Whether any registered set satisfies `predicate`.
    pub fn any(&self, predicate: impl Fn(&RenderableInstanceSet) -> bool) -> bool {
        self.snapshot().iter().any(|set| predicate(&set.lock()))
    }

    /// Drop every entry, detaching the sets.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries {
            entry.set.lock().detach_registry();
        }
    }
}
