//! Setup Handle
//!
//! The per-module capability object handed to [`Module::setup`](crate::Module::setup).

use crate::context::Context;
use crate::error::{CoreError, Result};
use crate::lifecycle::Application;
use crate::module::{HookFuture, LoadedModule, ModuleHooks};
use crate::property::{ContextProperty, CoreProperty, Property, PropertyDescriptor};
use axum::Router;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::Route;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tower::{Layer, Service};

/// Scoped access to the application for one module.
///
/// Every definition made through the handle is attributed to the module in
/// logs and error messages. The handle is cheap to clone and can be moved
/// into the module's own callbacks.
#[derive(Clone)]
pub struct SetupHandle {
    app: Application,
    name: Arc<str>,
    location: Arc<str>,
    hooks: Arc<ModuleHooks>,
}

impl SetupHandle {
    pub(crate) fn new(app: Application, loaded: &LoadedModule) -> Self {
        Self {
            app,
            name: Arc::from(loaded.info.name.as_str()),
            location: Arc::from(loaded.info.location.as_str()),
            hooks: Arc::clone(&loaded.hooks),
        }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    /// The module's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the module was registered.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Installs a property on the application.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateProperty`] when the name is built in or already
    /// defined by any module.
    pub fn define_core_property<T>(
        &self,
        name: &str,
        descriptor: PropertyDescriptor<Application, T>,
    ) -> Result<CoreProperty<T>>
    where
        T: Send + Sync + 'static,
    {
        self.app.core_properties().define(name, descriptor.into_slot())?;
        tracing::debug!(module = %self.name, property = name, "defineCoreProperty");
        Ok(Property::new(name))
    }

    /// Installs a property on every request context.
    pub fn define_context_property<T>(
        &self,
        name: &str,
        descriptor: PropertyDescriptor<Context, T>,
    ) -> Result<ContextProperty<T>>
    where
        T: Send + Sync + 'static,
    {
        self.app
            .context_properties()
            .define(name, descriptor.into_slot())?;
        tracing::debug!(module = %self.name, property = name, "defineContextProperty");
        Ok(Property::new(name))
    }

    /// Installs a context property computed at most once per request.
    ///
    /// The first read on a context runs `compute`; later reads on the same
    /// context return the stored result, `None` included.
    pub fn define_context_cache_property<T, F>(
        &self,
        name: &str,
        compute: F,
    ) -> Result<ContextProperty<T>>
    where
        T: Send + Sync + 'static,
        F: Fn(&Context) -> Option<T> + Send + Sync + 'static,
    {
        self.app
            .context_properties()
            .define(name, PropertyDescriptor::cached(compute).into_slot())?;
        tracing::debug!(module = %self.name, property = name, "defineContextCacheProperty");
        Ok(Property::new(name))
    }

    /// Typed handle for a core property installed by another module.
    ///
    /// Fails like [`SetupHandle::check_core_property`] when it is missing.
    pub fn core_property<T>(&self, name: &str) -> Result<CoreProperty<T>>
    where
        T: Send + Sync + 'static,
    {
        self.check_core_property(name, None)?;
        Ok(Property::new(name))
    }

    /// Typed handle for a context property installed by another module.
    pub fn context_property<T>(&self, name: &str) -> Result<ContextProperty<T>>
    where
        T: Send + Sync + 'static,
    {
        self.check_context_property(name, None)?;
        Ok(Property::new(name))
    }

    /// Fails unless `name` is a property of the application.
    pub fn check_core_property(&self, name: &str, message: Option<&str>) -> Result<()> {
        if self.app.core_properties().contains(name) {
            return Ok(());
        }
        Err(self.precondition(message, || format!("missing core property: {name}")))
    }

    /// Fails unless `name` is a property of the request context.
    pub fn check_context_property(&self, name: &str, message: Option<&str>) -> Result<()> {
        if self.app.context_properties().contains(name) {
            return Ok(());
        }
        Err(self.precondition(message, || format!("missing context property: {name}")))
    }

    /// Fails unless a module named `name` is registered.
    pub fn assert_module_exists(&self, name: &str, message: Option<&str>) -> Result<()> {
        if self.app.module_exists(name) {
            return Ok(());
        }
        Err(self.precondition(message, || format!("missing module: {name}")))
    }

    /// Adds a middleware function to the request chain.
    ///
    /// Middleware run in registration order across all modules: the first
    /// registered sees the request first and the response last.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// setup.middleware(|ctx: Context, req: Request, next: Next| async move {
    ///     let started = std::time::Instant::now();
    ///     let res = next.run(req).await;
    ///     tracing::info!(request_id = %ctx.id(), elapsed = ?started.elapsed());
    ///     res
    /// })?;
    /// ```
    pub fn middleware<F, Fut, Out>(&self, f: F) -> Result<()>
    where
        F: Fn(Context, Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Out> + Send + 'static,
        Out: IntoResponse + 'static,
    {
        self.layer(axum::middleware::from_fn::<_, (Request,)>(
            move |req: Request, next: Next| {
                let f = f.clone();
                async move {
                    match req.extensions().get::<Context>().cloned() {
                        Some(ctx) => f(ctx, req, next).await.into_response(),
                        None => missing_context(),
                    }
                }
            },
        ))
    }

    /// Adds a tower layer to the request chain, ordered like
    /// [`SetupHandle::middleware`].
    pub fn layer<L>(&self, layer: L) -> Result<()>
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        self.app
            .http()
            .push_layer(Box::new(move |router: Router| router.layer(layer)))?;
        tracing::debug!(module = %self.name, "middleware");
        Ok(())
    }

    /// Merges the module's routes into the application router.
    pub fn routes(&self, router: Router) -> Result<()> {
        self.app.http().merge(router)?;
        tracing::debug!(module = %self.name, "routes");
        Ok(())
    }

    /// Registers the callback run after every module finished its setup.
    ///
    /// A later call replaces the earlier callback.
    pub fn after<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks
            .set_after(Box::new(move || Box::pin(f()) as HookFuture));
    }

    /// Registers the callback run at shutdown, in reverse module order.
    ///
    /// A later call replaces the earlier callback.
    pub fn destroy<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks
            .set_destroy(Box::new(move || Box::pin(f()) as HookFuture));
    }

    fn precondition(&self, message: Option<&str>, default: impl FnOnce() -> String) -> CoreError {
        let message = message.map_or_else(default, str::to_string);
        tracing::debug!(module = %self.name, "{}", message);
        CoreError::precondition(message)
    }
}

impl std::fmt::Debug for SetupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupHandle")
            .field("name", &self.name)
            .field("location", &self.location)
            .finish()
    }
}

fn missing_context() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::MissingContext.to_string(),
    )
        .into_response()
}
