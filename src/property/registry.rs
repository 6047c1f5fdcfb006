use super::{AnyValue, Compute, PropertyTarget};
use crate::error::{CoreError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, OnceLock};

/// How a property produces its value when read.
pub(crate) enum Slot<S> {
    Value(AnyValue),
    Getter(Compute<S>),
    Cached(Compute<S>),
}

impl<S> Clone for Slot<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(Arc::clone(value)),
            Self::Getter(compute) => Self::Getter(Arc::clone(compute)),
            Self::Cached(compute) => Self::Cached(Arc::clone(compute)),
        }
    }
}

/// Named property slots installed on one target object.
///
/// A name can be defined at most once for the lifetime of the registry.
/// Built-in names of the target count as defined, so a module can neither
/// shadow them nor redefine a property another module already owns.
pub struct PropertyRegistry<S> {
    target: PropertyTarget,
    builtin: &'static [&'static str],
    slots: DashMap<String, Slot<S>>,
}

impl<S: 'static> PropertyRegistry<S> {
    pub(crate) fn new(target: PropertyTarget, builtin: &'static [&'static str]) -> Self {
        Self {
            target,
            builtin,
            slots: DashMap::new(),
        }
    }

    pub fn target(&self) -> PropertyTarget {
        self.target
    }

    /// Membership test used for duplicate detection and dependency checks.
    pub fn contains(&self, name: &str) -> bool {
        self.builtin.contains(&name) || self.slots.contains_key(name)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains(&name)
    }

    /// Names defined by modules, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn define(&self, name: &str, slot: Slot<S>) -> Result<()> {
        if name.is_empty() {
            return Err(CoreError::configuration(format!(
                "{} property name must not be empty",
                self.target
            )));
        }
        if self.is_builtin(name) {
            return Err(self.duplicated(name));
        }
        match self.slots.entry(name.to_string()) {
            Entry::Occupied(_) => Err(self.duplicated(name)),
            Entry::Vacant(entry) => {
                entry.insert(slot);
                Ok(())
            }
        }
    }

    pub(crate) fn slot(&self, name: &str) -> Option<Slot<S>> {
        self.slots.get(name).map(|entry| entry.value().clone())
    }

    pub(crate) fn not_found(&self, name: &str) -> CoreError {
        CoreError::PropertyNotFound {
            target: self.target,
            name: name.to_string(),
        }
    }

    fn duplicated(&self, name: &str) -> CoreError {
        CoreError::DuplicateProperty {
            target: self.target,
            name: name.to_string(),
        }
    }
}

/// Memoized values of cached properties for a single request context.
#[derive(Default)]
pub(crate) struct CacheSlots {
    cells: DashMap<String, Arc<OnceLock<Option<AnyValue>>>>,
}

impl CacheSlots {
    /// Returns the cached value for `name`, computing it on first access.
    ///
    /// The map shard lock is released before `compute` runs, so a compute
    /// function may read other properties of the same context.
    pub(crate) fn get_or_compute(
        &self,
        name: &str,
        compute: impl FnOnce() -> Option<AnyValue>,
    ) -> Option<AnyValue> {
        let cell = match self.cells.get(name) {
            Some(cell) => Arc::clone(cell.value()),
            None => Arc::clone(self.cells.entry(name.to_string()).or_default().value()),
        };
        cell.get_or_init(compute).clone()
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self, name: &str) -> bool {
        self.cells
            .get(name)
            .is_some_and(|cell| cell.value().get().is_some())
    }
}
