use super::{Module, SetupOptions};
use crate::error::{CoreError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

pub(crate) type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// An `after` or `destroy` callback registered by a module.
pub(crate) type Hook = Box<dyn FnOnce() -> HookFuture + Send>;

const ORDER_STEP: i64 = 100;

/// Public description of a registered module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub order: i64,
    /// Call site of the registration, used in error messages.
    pub location: String,
}

/// Per-module callback slots, filled in by the module during its setup.
///
/// Each slot holds at most one callback; a later registration replaces the
/// earlier one.
pub(crate) struct ModuleHooks {
    after: Mutex<Option<Hook>>,
    destroy: Mutex<Option<Hook>>,
}

impl ModuleHooks {
    fn new() -> Self {
        Self {
            after: Mutex::new(None),
            destroy: Mutex::new(None),
        }
    }

    pub(crate) fn set_after(&self, hook: Hook) {
        *self.after.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub(crate) fn set_destroy(&self, hook: Hook) {
        *self.destroy.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub(crate) fn take_after(&self) -> Option<Hook> {
        self.after.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub(crate) fn take_destroy(&self) -> Option<Hook> {
        self.destroy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn has_after(&self) -> bool {
        self.after
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn has_destroy(&self) -> bool {
        self.destroy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// A registration record: the module, where it was registered, and its hooks.
#[derive(Clone)]
pub(crate) struct LoadedModule {
    pub(crate) info: ModuleInfo,
    pub(crate) module: Arc<dyn Module>,
    pub(crate) hooks: Arc<ModuleHooks>,
}

/// Ordered collection of installed modules.
///
/// Records are never removed. Boot walks [`ModuleRegistry::ordered`] front
/// to back and shutdown walks the same sequence back to front.
pub struct ModuleRegistry {
    modules: Vec<LoadedModule>,
    order_counter: i64,
    sealed: bool,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            order_counter: 1,
            sealed: false,
        }
    }

    /// Queues a module. The module's setup is not invoked here.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the module has no name (neither an
    /// explicit one nor a declared one), when the name is already taken, or
    /// when boot has already started.
    pub(crate) fn register(
        &mut self,
        module: Arc<dyn Module>,
        options: SetupOptions,
        location: String,
    ) -> Result<ModuleInfo> {
        if self.sealed {
            return Err(CoreError::configuration(format!(
                "module registered at {location} after boot started"
            )));
        }

        let name = options
            .name
            .or_else(|| module.name())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "module registered at {location} has no name; pass SetupOptions::name"
                ))
            })?;

        if self.module_exists(&name) {
            return Err(CoreError::configuration(format!(
                "module [{name}] registered twice (at {location})"
            )));
        }

        let default_order = self.order_counter * ORDER_STEP;
        self.order_counter += 1;

        let info = ModuleInfo {
            name,
            order: options.order.unwrap_or(default_order),
            location,
        };
        self.modules.push(LoadedModule {
            info: info.clone(),
            module,
            hooks: Arc::new(ModuleHooks::new()),
        });
        Ok(info)
    }

    pub fn module_exists(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.info.name == name)
    }

    /// Modules sorted ascending by order; ties keep registration order.
    pub(crate) fn ordered(&self) -> Vec<LoadedModule> {
        let mut modules = self.modules.clone();
        modules.sort_by_key(|m| m.info.order);
        modules
    }

    pub fn ordered_info(&self) -> Vec<ModuleInfo> {
        self.ordered().into_iter().map(|m| m.info).collect()
    }

    /// Rejects further registrations.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
