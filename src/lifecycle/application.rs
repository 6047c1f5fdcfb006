//! Application Bootstrap
//!
//! The root object: owns the module registry, the property registries, the
//! HTTP engine, the lifecycle orchestrator and the process supervisor.

use super::{
    ExitHandler, LifecycleError, LifecycleOrchestrator, LifecycleState, ProcessSupervisor, Result,
    Signal,
};
use crate::config::{AppOptions, ConfigService};
use crate::context::{self, Context};
use crate::error::CoreError;
use crate::http::HttpEngine;
use crate::module::{LoadedModule, Module, ModuleInfo, ModuleRegistry, SetupOptions};
use crate::property::{AnyValue, PropertyHost, PropertyRegistry, PropertyTarget, Slot};
use axum::Router;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Names a module cannot define on the application.
const BUILTIN_PROPERTIES: &[&str] = &[
    "name",
    "start_time",
    "options",
    "config",
    "setup",
    "boot",
    "start",
    "stop",
    "listen",
    "close_listen",
    "handler",
    "module_exists",
    "state",
    "local_addr",
];

/// A modular HTTP application.
///
/// Modules are registered with [`Application::setup`] and installed by
/// [`Application::boot`]; [`Application::start`] boots, listens and then
/// waits for a termination signal. The handle is cheap to clone and every
/// clone refers to the same application.
///
/// # Example
///
/// ```rust,ignore
/// use modcore::{AppOptions, Application};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let app = Application::new(AppOptions::default());
///     app.setup(database)?.setup(api)?;
///     app.start(None).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    start_time: DateTime<Utc>,
    options: AppOptions,
    config: ConfigService,
    modules: Mutex<ModuleRegistry>,
    core_properties: PropertyRegistry<Application>,
    context_properties: PropertyRegistry<Context>,
    http: Mutex<HttpEngine>,
    orchestrator: LifecycleOrchestrator,
    supervisor: ProcessSupervisor,
}

impl Application {
    /// An application configured from `options` and the process environment.
    pub fn new(options: AppOptions) -> Self {
        Self::builder().options(options).build()
    }

    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// `APP_NAME`, else the host name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// When the application object was created.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.start_time
    }

    pub fn options(&self) -> &AppOptions {
        &self.inner.options
    }

    pub fn config(&self) -> &ConfigService {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.orchestrator.state()
    }

    /// Receiver notified on every lifecycle state change.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.orchestrator.subscribe()
    }

    /// Registers a module under its declared name.
    ///
    /// The module's setup runs later, during [`Application::boot`]. The
    /// caller's source location is recorded for error messages.
    ///
    /// # Errors
    ///
    /// A configuration error when the module has no usable name, the name is
    /// taken, or boot has already begun.
    #[track_caller]
    pub fn setup<M: Module>(&self, module: M) -> std::result::Result<&Self, CoreError> {
        self.setup_with(module, SetupOptions::new())
    }

    /// Registers a module with an explicit name and/or order.
    #[track_caller]
    pub fn setup_with<M: Module>(
        &self,
        module: M,
        options: SetupOptions,
    ) -> std::result::Result<&Self, CoreError> {
        let caller = Location::caller();
        let location = format!("{}:{}:{}", caller.file(), caller.line(), caller.column());

        let info = self
            .lock_modules()
            .register(Arc::new(module), options, location)?;
        tracing::debug!(
            module = %info.name,
            order = info.order,
            location = %info.location,
            "Module registered"
        );
        Ok(self)
    }

    pub fn module_exists(&self, name: &str) -> bool {
        self.lock_modules().module_exists(name)
    }

    /// Registered modules in boot order.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.lock_modules().ordered_info()
    }

    /// Properties installed on the application.
    pub fn core_properties(&self) -> &PropertyRegistry<Application> {
        &self.inner.core_properties
    }

    /// Properties installed on every request context.
    pub fn context_properties(&self) -> &PropertyRegistry<Context> {
        &self.inner.context_properties
    }

    /// Installs every registered module.
    ///
    /// Runs each module's setup in ascending order, then every `after`
    /// callback in the same order. A failure stops the boot and terminates
    /// the process with status 1 through the exit handler.
    pub async fn boot(&self) -> Result<&Self> {
        if let Err(e) = self.boot_modules().await {
            if matches!(e, LifecycleError::SetupPhase { .. }) {
                self.fatal(&e);
            }
            return Err(e);
        }
        Ok(self)
    }

    async fn boot_modules(&self) -> Result<()> {
        let modules = {
            let mut registry = self.lock_modules();
            registry.seal();
            registry.ordered()
        };

        let orchestrator = &self.inner.orchestrator;
        orchestrator.run_setup_phase(self, &modules).await?;
        orchestrator.run_after_phase(&modules).await?;
        orchestrator.mark_ready()?;

        let elapsed = Utc::now() - self.inner.start_time;
        tracing::info!(
            modules = modules.len(),
            "boot time: {} ms",
            elapsed.num_milliseconds()
        );
        Ok(())
    }

    /// The finished request handler: every module's middleware wrapped
    /// around every module's routes.
    ///
    /// Can be taken once, normally after boot; [`Application::listen`] takes
    /// it internally.
    pub fn handler(&self) -> std::result::Result<Router, CoreError> {
        self.http().take(self.clone())
    }

    /// Binds the listener and serves the handler.
    ///
    /// Port precedence is `port`, [`AppOptions::port`], `PORT`, then 7001.
    /// Port 0 binds an ephemeral port; the bound address is returned.
    pub async fn listen(&self, port: Option<u16>) -> Result<SocketAddr> {
        let config = &self.inner.config;
        let port = config.resolve_port(port, &self.inner.options);
        let host = config.resolve_host(&self.inner.options);
        let router = self.handler()?;

        self.inner
            .supervisor
            .listen(&format!("{host}:{port}"), router)
            .await
    }

    /// Stops accepting connections. No-op when not listening.
    pub async fn close_listen(&self) -> Result<()> {
        self.inner.supervisor.close_listen().await
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.supervisor.local_addr()
    }

    /// Subscribes to SIGINT and SIGTERM so that they stop the application.
    pub fn arm_signal_handlers(&self) {
        self.inner.supervisor.arm_signal_handlers(self);
    }

    /// Boots, listens, arms the signal handlers, then waits until the
    /// application has stopped.
    ///
    /// Any failure before the wait terminates the process with status 1.
    pub async fn start(&self, port: Option<u16>) -> Result<()> {
        let started = async {
            self.boot_modules().await?;
            self.listen(port).await?;
            self.arm_signal_handlers();
            Ok::<_, LifecycleError>(())
        }
        .await;

        if let Err(e) = started {
            self.fatal(&e);
            return Err(e);
        }

        self.stopped().await;
        Ok(())
    }

    /// Resolves once the application reached [`LifecycleState::Stopped`].
    pub async fn stopped(&self) {
        let mut rx = self.subscribe_state();
        let _ = rx.wait_for(|state| *state == LifecycleState::Stopped).await;
    }

    /// Shuts the application down: closes the listener, then runs every
    /// module's destroy callback in descending order.
    ///
    /// Destroy failures are logged and do not interrupt the shutdown. A stop
    /// requested while another one is in progress, or after the application
    /// has stopped, forces the process to exit with status 1.
    pub async fn stop(&self, signal: Signal) -> Result<()> {
        tracing::info!(signal = %signal, "received signal: {}", signal);

        let supervisor = &self.inner.supervisor;
        if !supervisor.try_begin_stopping() {
            tracing::error!("force exit");
            self.log_active_resources();
            supervisor.exit(1);
            return Err(LifecycleError::ForcedExit);
        }

        let orchestrator = &self.inner.orchestrator;
        orchestrator.begin_stop()?;

        tracing::info!("close listen...");
        if let Err(e) = self.close_listen().await {
            tracing::error!(error = %e, "close listen error");
        }

        tracing::info!("destroy modules...");
        let modules = self.loaded_modules();
        let failures = orchestrator.run_destroy_phase(&modules).await;
        if !failures.is_empty() {
            tracing::warn!(failed = failures.len(), "Some modules failed to destroy");
        }

        orchestrator.finish_stop()?;
        tracing::info!("server stopped");
        Ok(())
    }

    /// Stop triggered by the signal watcher.
    pub(crate) async fn handle_signal(self, signal: Signal) {
        match self.stop(signal).await {
            Ok(()) => {
                if self.inner.options.exit_on_stop {
                    self.inner.supervisor.exit(0);
                }
            }
            // already exited
            Err(LifecycleError::ForcedExit) => {}
            Err(e) => self.fatal(&e),
        }
    }

    fn fatal(&self, e: &LifecycleError) {
        tracing::error!(error = %e, "fatal error");
        self.inner.supervisor.exit(e.exit_code());
    }

    fn log_active_resources(&self) {
        let pending = self.inner.orchestrator.pending_teardown();
        tracing::warn!(
            state = %self.state(),
            listening = self.inner.supervisor.is_listening(),
            local_addr = ?self.local_addr(),
            pending_destroy = ?pending,
            "active resources"
        );
    }

    pub(crate) fn loaded_modules(&self) -> Vec<LoadedModule> {
        self.lock_modules().ordered()
    }

    pub(crate) fn http(&self) -> MutexGuard<'_, HttpEngine> {
        self.inner
            .http
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_modules(&self) -> MutexGuard<'_, ModuleRegistry> {
        self.inner
            .modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PropertyHost for Application {
    const TARGET: PropertyTarget = PropertyTarget::Core;

    fn read_property(&self, name: &str) -> crate::error::Result<Option<AnyValue>> {
        let registry = &self.inner.core_properties;
        let slot = registry.slot(name).ok_or_else(|| registry.not_found(name))?;
        Ok(match slot {
            Slot::Value(value) => Some(value),
            Slot::Getter(get) | Slot::Cached(get) => get(self),
        })
    }

    fn has_property(&self, name: &str) -> bool {
        self.inner.core_properties.contains(name)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("handler_taken", &self.http().is_taken())
            .finish()
    }
}

/// Builder for [`Application`]
pub struct ApplicationBuilder {
    options: Option<AppOptions>,
    config: Option<ConfigService>,
    exit_handler: Option<ExitHandler>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            options: None,
            config: None,
            exit_handler: None,
        }
    }

    /// Defaults to [`AppOptions::from_config`].
    pub fn options(mut self, options: AppOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Defaults to a snapshot of the process environment.
    pub fn config(mut self, config: ConfigService) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces `std::process::exit` as the process termination path.
    pub fn exit_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Application {
        let config = self.config.unwrap_or_else(ConfigService::new);
        let options = self
            .options
            .unwrap_or_else(|| AppOptions::from_config(&config));
        let exit = self
            .exit_handler
            .unwrap_or_else(|| Arc::new(|code| std::process::exit(code)));

        Application {
            inner: Arc::new(Inner {
                name: config.app_name(),
                start_time: Utc::now(),
                options,
                config,
                modules: Mutex::new(ModuleRegistry::new()),
                core_properties: PropertyRegistry::new(PropertyTarget::Core, BUILTIN_PROPERTIES),
                context_properties: PropertyRegistry::new(
                    PropertyTarget::Context,
                    context::BUILTIN_PROPERTIES,
                ),
                http: Mutex::new(HttpEngine::new()),
                orchestrator: LifecycleOrchestrator::new(),
                supervisor: ProcessSupervisor::new(exit),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyDescriptor;
    use crate::setup::SetupHandle;
    use std::sync::atomic::{AtomicI32, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    fn test_app() -> (Application, Arc<AtomicI32>) {
        let code = Arc::new(AtomicI32::new(-1));
        let recorded = Arc::clone(&code);
        let config = ConfigService::empty();
        config.set("APP_NAME", "test-app");
        let app = Application::builder()
            .config(config)
            .exit_handler(move |c| recorded.store(c, Ordering::SeqCst))
            .build();
        (app, code)
    }

    fn tracked(log: &Log, name: &'static str) -> impl Module {
        let log = Arc::clone(log);
        move |setup: SetupHandle| {
            log.lock().unwrap().push(format!("setup {name}"));
            let after_log = Arc::clone(&log);
            setup.after(move || async move {
                after_log.lock().unwrap().push(format!("after {name}"));
                anyhow::Ok(())
            });
            let destroy_log = Arc::clone(&log);
            setup.destroy(move || async move {
                destroy_log.lock().unwrap().push(format!("destroy {name}"));
                anyhow::Ok(())
            });
            std::future::ready(anyhow::Ok(()))
        }
    }

    #[tokio::test]
    async fn boot_and_stop_follow_module_order() {
        let (app, _) = test_app();
        let log: Log = Arc::default();
        app.setup_with(tracked(&log, "m1"), SetupOptions::new().name("m1"))
            .unwrap()
            .setup_with(
                tracked(&log, "m2"),
                SetupOptions::new().name("m2").order(50),
            )
            .unwrap();

        app.boot().await.unwrap();
        assert_eq!(app.state(), LifecycleState::Ready);
        app.stop(Signal::Manual).await.unwrap();
        assert_eq!(app.state(), LifecycleState::Stopped);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "setup m2", "setup m1", "after m2", "after m1", "destroy m1", "destroy m2"
            ]
        );
    }

    #[tokio::test]
    async fn setup_failure_exits_with_status_1() {
        let (app, code) = test_app();
        let reached: Log = Arc::default();
        let later = Arc::clone(&reached);

        app.setup_with(
            |_setup: SetupHandle| async { Err::<(), _>(anyhow::anyhow!("no database")) },
            SetupOptions::new().name("db"),
        )
        .unwrap()
        .setup_with(
            move |_setup: SetupHandle| {
                later.lock().unwrap().push("api".to_string());
                async { anyhow::Ok(()) }
            },
            SetupOptions::new().name("api"),
        )
        .unwrap();

        let err = app.boot().await.unwrap_err();
        assert!(err.to_string().contains("module [db]"));
        assert!(err.to_string().contains("no database"));
        assert_eq!(code.load(Ordering::SeqCst), 1);
        assert!(reached.lock().unwrap().is_empty());
        assert_eq!(app.state(), LifecycleState::Booting);
    }

    #[tokio::test]
    async fn registration_after_boot_is_rejected() {
        let (app, _) = test_app();
        app.boot().await.unwrap();

        let err = app
            .setup_with(
                |_setup: SetupHandle| async { anyhow::Ok(()) },
                SetupOptions::new().name("late"),
            )
            .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn second_stop_is_forced() {
        let (app, code) = test_app();
        app.boot().await.unwrap();

        app.stop(Signal::Interrupt).await.unwrap();
        assert_eq!(code.load(Ordering::SeqCst), -1);

        let err = app.stop(Signal::Interrupt).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ForcedExit));
        assert_eq!(code.load(Ordering::SeqCst), 1);
        assert_eq!(app.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn signal_stop_exits_cleanly_when_configured() {
        let code = Arc::new(AtomicI32::new(-1));
        let recorded = Arc::clone(&code);
        let app = Application::builder()
            .config(ConfigService::empty())
            .options(AppOptions {
                exit_on_stop: true,
                ..AppOptions::default()
            })
            .exit_handler(move |c| recorded.store(c, Ordering::SeqCst))
            .build();
        app.boot().await.unwrap();

        app.clone().handle_signal(Signal::Terminate).await;
        assert_eq!(code.load(Ordering::SeqCst), 0);
        assert_eq!(app.state(), LifecycleState::Stopped);

        app.clone().handle_signal(Signal::Interrupt).await;
        assert_eq!(code.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_core_property_fails_the_second_module() {
        let (app, code) = test_app();
        let define = |value: u32| {
            move |setup: SetupHandle| async move {
                setup.define_core_property("limit", PropertyDescriptor::value(value))?;
                anyhow::Ok(())
            }
        };
        app.setup_with(define(1), SetupOptions::new().name("first"))
            .unwrap()
            .setup_with(define(2), SetupOptions::new().name("second"))
            .unwrap();

        let err = app.boot().await.unwrap_err();
        assert!(matches!(
            &err,
            LifecycleError::SetupPhase { module, .. } if module == "second"
        ));
        assert!(err.to_string().contains("define core property [limit] duplicated"));
        assert_eq!(code.load(Ordering::SeqCst), 1);
        assert_eq!(*app.property::<u32>("limit").unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn cached_property_is_computed_once_per_context() {
        let (app, _) = test_app();
        let calls = Arc::new(AtomicI32::new(0));
        let counted = Arc::clone(&calls);
        app.setup_with(
            move |setup: SetupHandle| {
                let counted = Arc::clone(&counted);
                async move {
                    setup.define_context_cache_property("token", move |_ctx: &Context| {
                        counted.fetch_add(1, Ordering::SeqCst);
                        None::<String>
                    })?;
                    anyhow::Ok(())
                }
            },
            SetupOptions::new().name("auth"),
        )
        .unwrap();
        app.boot().await.unwrap();

        let req = axum::extract::Request::new(axum::body::Body::empty());
        let ctx = Context::for_request(app.clone(), &req);
        assert!(!ctx.is_cached("token"));
        assert!(ctx.property::<String>("token").unwrap().is_none());
        assert!(ctx.is_cached("token"));
        assert!(ctx.property::<String>("token").unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other = Context::for_request(app.clone(), &req);
        assert!(other.property::<String>("token").unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handler_can_be_taken_once() {
        let (app, _) = test_app();
        app.boot().await.unwrap();
        let _router = app.handler().unwrap();
        assert!(matches!(app.handler(), Err(CoreError::HandlerTaken)));

        let err = app.listen(Some(0)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Core(CoreError::HandlerTaken)));
    }

    #[test]
    fn name_comes_from_config() {
        let (app, _) = test_app();
        assert_eq!(app.name(), "test-app");
        assert!(app.start_time() <= Utc::now());
        assert!(app.has_property("start_time"));
        assert!(!app.has_property("db"));
    }
}
