mod registry;

pub use registry::{ModuleInfo, ModuleRegistry};
pub(crate) use registry::{HookFuture, LoadedModule, ModuleHooks};
#[cfg(test)]
pub(crate) use registry::Hook;

use crate::setup::SetupHandle;
use async_trait::async_trait;
use std::future::Future;

/// Trait for application modules
///
/// A module receives a [`SetupHandle`] once during boot and uses it to install
/// properties, middleware and routes, and to register its `after` and
/// `destroy` callbacks.
///
/// Any `async fn(SetupHandle) -> anyhow::Result<()>` is a module; its name is
/// the function's own name.
///
/// # Example
/// ```rust,ignore
/// use modcore::{Application, SetupHandle, PropertyDescriptor};
///
/// async fn db(setup: SetupHandle) -> anyhow::Result<()> {
///     setup.define_core_property("db", PropertyDescriptor::value(Pool::connect().await?))?;
///     setup.destroy(|| async { Ok(()) });
///     Ok(())
/// }
///
/// let app = Application::new(Default::default());
/// app.setup(db)?;
/// ```
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// The module's declared name, used when no explicit name is given at
    /// registration.
    fn name(&self) -> Option<String> {
        declared_name(std::any::type_name::<Self>())
    }

    /// Installs the module into the application.
    async fn setup(&self, setup: SetupHandle) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Module for F
where
    F: Fn(SetupHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> Option<String> {
        declared_name(std::any::type_name::<F>())
    }

    async fn setup(&self, setup: SetupHandle) -> anyhow::Result<()> {
        (self)(setup).await
    }
}

/// Extracts the last path segment of a type name.
///
/// Closures, fn pointers and other unnamed types (references, tuples,
/// slices, trait objects) yield `None`.
fn declared_name(type_name: &str) -> Option<String> {
    const UNNAMED: [&str; 7] = ["fn(", "unsafe ", "extern ", "&", "(", "[", "dyn "];
    if type_name.contains("{{closure}}") || UNNAMED.iter().any(|p| type_name.starts_with(p)) {
        return None;
    }
    let path = type_name.split('<').next().unwrap_or(type_name);
    path.rsplit("::")
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Options accepted by [`Application::setup_with`](crate::Application::setup_with).
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub(crate) name: Option<String>,
    pub(crate) order: Option<i64>,
}

impl SetupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the module's declared name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the default order (a multiple of 100 in registration order).
    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }
}
