//! Property Registry
//!
//! Modules extend the shared application object and the per-request context
//! by installing named properties. Each target keeps an explicit registry of
//! typed slots instead of growing its shape at runtime:
//!
//! ```text
//! define_core_property("db", value)        → Application registry
//! define_context_property("locale", getter) → Context registry
//! define_context_cache_property("user", f) → Context registry, memoized per request
//! ```
//!
//! Every definition returns a typed [`Property`] handle that reads the value
//! back without repeating the name or the type.

mod registry;

pub use registry::PropertyRegistry;
pub(crate) use registry::{CacheSlots, Slot};

use crate::context::Context;
use crate::error::{CoreError, Result};
use crate::lifecycle::Application;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// A type-erased property value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

pub(crate) type Compute<S> = Arc<dyn Fn(&S) -> Option<AnyValue> + Send + Sync>;

/// The object a property is installed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PropertyTarget {
    Core,
    Context,
}

/// Describes how a property of type `T` on host `S` produces its value.
pub struct PropertyDescriptor<S, T> {
    slot: Slot<S>,
    _marker: PhantomData<fn() -> T>,
}

impl<S: 'static, T: Send + Sync + 'static> PropertyDescriptor<S, T> {
    /// A value shared by every read.
    pub fn value(value: T) -> Self {
        Self::from_slot(Slot::Value(Arc::new(value)))
    }

    /// A value computed from the host on every read.
    pub fn getter<F>(get: F) -> Self
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        Self::from_slot(Slot::Getter(Arc::new(move |host: &S| {
            Some(Arc::new(get(host)) as AnyValue)
        })))
    }

    pub(crate) fn cached<F>(compute: F) -> Self
    where
        F: Fn(&S) -> Option<T> + Send + Sync + 'static,
    {
        Self::from_slot(Slot::Cached(Arc::new(move |host: &S| {
            compute(host).map(|value| Arc::new(value) as AnyValue)
        })))
    }

    pub(crate) fn into_slot(self) -> Slot<S> {
        self.slot
    }

    fn from_slot(slot: Slot<S>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }
}

/// An object modules can install properties on.
pub trait PropertyHost: Sized + Send + Sync + 'static {
    const TARGET: PropertyTarget;

    /// Reads the raw value of a property defined by a module.
    fn read_property(&self, name: &str) -> Result<Option<AnyValue>>;

    /// Membership test, built-in names included.
    fn has_property(&self, name: &str) -> bool;

    /// Reads a property and downcasts it to `T`.
    ///
    /// `Ok(None)` is returned when a getter or cache computation produced no
    /// value.
    fn property<T: Send + Sync + 'static>(&self, name: &str) -> Result<Option<Arc<T>>> {
        match self.read_property(name)? {
            None => Ok(None),
            Some(value) => value
                .downcast::<T>()
                .map(Some)
                .map_err(|_| CoreError::PropertyType {
                    target: Self::TARGET,
                    name: name.to_string(),
                    expected: std::any::type_name::<T>(),
                }),
        }
    }
}

/// Typed accessor returned when a property is defined.
pub struct Property<S, T> {
    name: Arc<str>,
    _marker: PhantomData<fn(&S) -> T>,
}

/// Accessor for a property installed on the [`Application`].
pub type CoreProperty<T> = Property<Application, T>;

/// Accessor for a property installed on every request [`Context`].
pub type ContextProperty<T> = Property<Context, T>;

impl<S, T> Property<S, T> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S: PropertyHost, T: Send + Sync + 'static> Property<S, T> {
    /// Reads the property from `host`.
    pub fn get(&self, host: &S) -> Option<Arc<T>> {
        match host.property::<T>(&self.name) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(property = %self.name, error = %e, "Property read failed");
                None
            }
        }
    }
}

impl<S, T> Clone for Property<S, T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<S, T> std::fmt::Debug for Property<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
