//! Lifecycle Orchestrator
//!
//! Drives module callbacks through the lifecycle phases and owns the state
//! machine.

use super::{Application, LifecycleError, LifecycleState, Phase, Result};
use crate::module::LoadedModule;
use crate::setup::SetupHandle;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::Instrument;

/// Runs the setup, after and destroy phases across the loaded modules.
///
/// Each phase awaits one module at a time:
/// - setup and after run in ascending order and stop at the first failure
/// - destroy runs in descending order and keeps going past failures
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = LifecycleOrchestrator::new();
///
/// orchestrator.run_setup_phase(&app, &modules).await?;
/// orchestrator.run_after_phase(&modules).await?;
/// orchestrator.mark_ready()?;
/// // ... application runs ...
/// orchestrator.begin_stop()?;
/// orchestrator.run_destroy_phase(&modules).await;
/// orchestrator.finish_stop()?;
/// ```
pub struct LifecycleOrchestrator {
    state: watch::Sender<LifecycleState>,
    pending_teardown: Mutex<Vec<String>>,
}

impl Default for LifecycleOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleOrchestrator {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            state,
            pending_teardown: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Moves to `next` if the state machine allows it.
    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                result = Err(LifecycleError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        if result.is_ok() {
            tracing::debug!(state = %next, "Lifecycle transition");
        }
        result
    }

    /// `Idle → Booting`: invoke every module's setup in ascending order.
    ///
    /// The first failure aborts the phase; later modules are not set up.
    pub(crate) async fn run_setup_phase(
        &self,
        app: &Application,
        modules: &[LoadedModule],
    ) -> Result<()> {
        self.transition(LifecycleState::Booting)?;
        tracing::info!("Calling module setup...");

        for loaded in modules {
            let info = &loaded.info;
            let span = tracing::debug_span!("module", name = %info.name);
            tracing::debug!(parent: &span, order = info.order, location = %info.location, "setup");

            let handle = SetupHandle::new(app.clone(), loaded);
            if let Err(e) = loaded.module.setup(handle).instrument(span.clone()).await {
                tracing::error!(
                    module = %info.name,
                    location = %info.location,
                    "module setup error: {:#}",
                    e
                );
                return Err(LifecycleError::setup_phase(
                    &info.name,
                    &info.location,
                    Phase::Setup,
                    e,
                ));
            }
            tracing::debug!(parent: &span, "setup success");
        }

        tracing::info!("Module setup complete ({} modules)", modules.len());
        Ok(())
    }

    /// `Booting → AfterPhase`: invoke the recorded after callbacks in
    /// ascending order. The first failure aborts the phase.
    pub(crate) async fn run_after_phase(&self, modules: &[LoadedModule]) -> Result<()> {
        self.transition(LifecycleState::AfterPhase)?;
        let registered = modules.iter().filter(|m| m.hooks.has_after()).count();
        tracing::debug!("Calling {} after callbacks...", registered);

        let mut executed = 0;
        for loaded in modules {
            let Some(after) = loaded.hooks.take_after() else {
                continue;
            };
            let info = &loaded.info;
            let span = tracing::debug_span!("module", name = %info.name);
            tracing::debug!(parent: &span, "after");

            if let Err(e) = after().instrument(span.clone()).await {
                tracing::error!(
                    module = %info.name,
                    location = %info.location,
                    "module setup after error: {:#}",
                    e
                );
                return Err(LifecycleError::setup_phase(
                    &info.name,
                    &info.location,
                    Phase::After,
                    e,
                ));
            }
            executed += 1;
            tracing::debug!(parent: &span, "after success");
        }

        tracing::debug!("After callbacks complete ({} executed)", executed);
        Ok(())
    }

    /// `AfterPhase → Ready`.
    pub fn mark_ready(&self) -> Result<()> {
        self.transition(LifecycleState::Ready)
    }

    /// `* → Stopping`.
    pub fn begin_stop(&self) -> Result<()> {
        self.transition(LifecycleState::Stopping)
    }

    /// Invoke the recorded destroy callbacks in **descending** order.
    ///
    /// A failing callback is logged and skipped; the remaining modules are
    /// still destroyed. The failures are returned for inspection.
    pub(crate) async fn run_destroy_phase(&self, modules: &[LoadedModule]) -> Vec<LifecycleError> {
        *self.pending() = modules
            .iter()
            .rev()
            .filter(|m| m.hooks.has_destroy())
            .map(|m| m.info.name.clone())
            .collect();

        let mut failures = Vec::new();
        for loaded in modules.iter().rev() {
            let Some(destroy) = loaded.hooks.take_destroy() else {
                continue;
            };
            let info = &loaded.info;
            let span = tracing::debug_span!("module", name = %info.name);
            tracing::debug!(parent: &span, "destroy");

            match destroy().instrument(span.clone()).await {
                Ok(()) => tracing::debug!(parent: &span, "destroy success"),
                Err(e) => {
                    // Log error but continue with other modules
                    tracing::error!(
                        module = %info.name,
                        location = %info.location,
                        "module destroy error: {:#}",
                        e
                    );
                    failures.push(LifecycleError::teardown(&info.name, &info.location, e));
                }
            }
            self.pending().retain(|name| name != &info.name);
        }

        failures
    }

    /// `Stopping → Stopped`.
    pub fn finish_stop(&self) -> Result<()> {
        self.transition(LifecycleState::Stopped)
    }

    /// Modules whose destroy callback has not finished yet.
    pub fn pending_teardown(&self) -> Vec<String> {
        self.pending().clone()
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.pending_teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{HookFuture, ModuleRegistry, SetupOptions};
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn loaded(names: &[&str]) -> Vec<LoadedModule> {
        let mut registry = ModuleRegistry::new();
        for name in names {
            registry
                .register(
                    Arc::new(|_setup: SetupHandle| async { anyhow::Ok(()) }),
                    SetupOptions::new().name(*name),
                    format!("{name}.rs:1:1"),
                )
                .unwrap();
        }
        registry.ordered()
    }

    fn record(log: &Log, entry: &str, fail: bool) -> crate::module::Hook {
        let log = Arc::clone(log);
        let entry = entry.to_string();
        Box::new(move || -> HookFuture {
            Box::pin(async move {
                log.lock().unwrap().push(entry.clone());
                if fail {
                    anyhow::bail!("{entry} failed");
                }
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn destroy_runs_in_reverse_and_survives_failures() {
        let modules = loaded(&["a", "b", "c"]);
        let log: Log = Arc::default();
        modules[0].hooks.set_destroy(record(&log, "a", false));
        modules[1].hooks.set_destroy(record(&log, "b", true));
        modules[2].hooks.set_destroy(record(&log, "c", false));

        let orchestrator = LifecycleOrchestrator::new();
        orchestrator.begin_stop().unwrap();
        let failures = orchestrator.run_destroy_phase(&modules).await;
        orchestrator.finish_stop().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        assert_eq!(failures.len(), 1);
        assert!(matches!(&failures[0], LifecycleError::Teardown { module, .. } if module == "b"));
        assert!(orchestrator.pending_teardown().is_empty());
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn destroy_callbacks_run_once() {
        let modules = loaded(&["a"]);
        let log: Log = Arc::default();
        modules[0].hooks.set_destroy(record(&log, "a", false));

        let orchestrator = LifecycleOrchestrator::new();
        orchestrator.run_destroy_phase(&modules).await;
        orchestrator.run_destroy_phase(&modules).await;

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn after_phase_stops_at_first_failure() {
        let modules = loaded(&["a", "b", "c"]);
        let log: Log = Arc::default();
        modules[0].hooks.set_after(record(&log, "a", false));
        modules[1].hooks.set_after(record(&log, "b", true));
        modules[2].hooks.set_after(record(&log, "c", false));

        let orchestrator = LifecycleOrchestrator::new();
        orchestrator.transition(LifecycleState::Booting).unwrap();
        let err = orchestrator.run_after_phase(&modules).await.unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::SetupPhase { ref module, phase: Phase::After, .. } if module == "b"
        ));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let orchestrator = LifecycleOrchestrator::new();
        let err = orchestrator.mark_ready().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: LifecycleState::Idle,
                to: LifecycleState::Ready
            }
        ));
        assert_eq!(orchestrator.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let orchestrator = LifecycleOrchestrator::new();
        let mut rx = orchestrator.subscribe();
        orchestrator.begin_stop().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Stopping);
    }
}
