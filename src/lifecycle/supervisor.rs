//! Process Supervisor
//!
//! Owns the listening socket, the OS signal subscription and the process
//! exit path.

use super::{Application, LifecycleError, Result};
use axum::Router;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Called with the process exit status when the application terminates the
/// process.
pub type ExitHandler = Arc<dyn Fn(i32) + Send + Sync>;

/// What triggered a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Signal {
    #[strum(serialize = "SIGINT")]
    Interrupt,
    #[strum(serialize = "SIGTERM")]
    Terminate,
    /// `stop` called by the application itself
    #[strum(serialize = "manual")]
    Manual,
}

struct Listener {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Listener, signal and exit ownership for one application.
pub struct ProcessSupervisor {
    listener: Mutex<Option<Listener>>,
    stopping: AtomicBool,
    exit: ExitHandler,
}

impl ProcessSupervisor {
    pub(crate) fn new(exit: ExitHandler) -> Self {
        Self {
            listener: Mutex::new(None),
            stopping: AtomicBool::new(false),
            exit,
        }
    }

    /// Binds `addr` and serves `router` on it.
    ///
    /// Returns once the socket accepts connections.
    pub(crate) async fn listen(&self, addr: &str, router: Router) -> Result<SocketAddr> {
        if let Some(current) = self.local_addr() {
            return Err(LifecycleError::Listen {
                addr: addr.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("already listening on {current}"),
                ),
            });
        }

        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| LifecycleError::Listen {
                addr: addr.to_string(),
                source,
            })?;
        let bound = tcp.local_addr().map_err(|source| LifecycleError::Listen {
            addr: addr.to_string(),
            source,
        })?;

        let (shutdown, rx) = oneshot::channel::<()>();
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        let task = tokio::spawn(async move {
            axum::serve(tcp, service)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
        });

        *self.lock_listener() = Some(Listener {
            addr: bound,
            shutdown,
            task,
        });
        tracing::info!(port = bound.port(), "server on: {}", bound.port());
        Ok(bound)
    }

    /// Stops accepting connections and waits for the server to drain.
    ///
    /// Succeeds immediately when not listening.
    pub(crate) async fn close_listen(&self) -> Result<()> {
        let Some(listener) = self.lock_listener().take() else {
            return Ok(());
        };

        let _ = listener.shutdown.send(());
        match listener.task.await {
            Ok(Ok(())) => {
                tracing::debug!(addr = %listener.addr, "Listener closed");
                Ok(())
            }
            Ok(Err(e)) => Err(LifecycleError::Close(e.to_string())),
            Err(e) => Err(LifecycleError::Close(e.to_string())),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock_listener().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_listener().as_ref().map(|l| l.addr)
    }

    /// Sets the stopping flag; false if it was already set.
    pub(crate) fn try_begin_stopping(&self) -> bool {
        !self.stopping.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn exit(&self, code: i32) {
        tracing::debug!(code, "Exiting process");
        (self.exit)(code);
    }

    /// Subscribes to SIGINT and SIGTERM; every signal runs a stop.
    ///
    /// Each stop runs in its own task so that a second signal reaches the
    /// forced-exit path while the first stop is still in progress.
    ///
    /// The terminal is left in cooked mode: there the driver turns the Ctrl+C
    /// keystroke into SIGINT, so an interactive interrupt takes the same path
    /// and stdin is never read.
    pub(crate) fn arm_signal_handlers(&self, app: &Application) {
        let mut signals = match SignalWatcher::new() {
            Ok(signals) => signals,
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for signals");
                return;
            }
        };

        let watcher = app.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let app = watcher.clone();
                tokio::spawn(async move { app.handle_signal(signal).await });
            }
        });

        if std::io::stdin().is_terminal() {
            tracing::info!("press Ctrl+C to stop server");
        }
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<Listener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// SIGINT and SIGTERM subscriptions.
///
/// Both streams live as long as the watcher, so a signal delivered while a
/// previous one is being handled is queued rather than lost.
struct SignalWatcher {
    #[cfg(unix)]
    interrupt: signal::unix::Signal,
    #[cfg(unix)]
    terminate: signal::unix::Signal,
    #[cfg(windows)]
    interrupt: signal::windows::CtrlC,
}

#[cfg(unix)]
impl SignalWatcher {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Next signal, or `None` once both streams are closed.
    async fn recv(&mut self) -> Option<Signal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(Signal::Interrupt),
            Some(()) = self.terminate.recv() => Some(Signal::Terminate),
            else => None,
        }
    }
}

#[cfg(windows)]
impl SignalWatcher {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) -> Option<Signal> {
        self.interrupt.recv().await.map(|()| Signal::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn supervisor() -> (ProcessSupervisor, Arc<AtomicI32>) {
        let code = Arc::new(AtomicI32::new(-1));
        let recorded = Arc::clone(&code);
        let supervisor = ProcessSupervisor::new(Arc::new(move |c| {
            recorded.store(c, Ordering::SeqCst);
        }));
        (supervisor, code)
    }

    #[tokio::test]
    async fn close_without_listen_succeeds() {
        let (supervisor, _) = supervisor();
        assert!(!supervisor.is_listening());
        supervisor.close_listen().await.unwrap();
        supervisor.close_listen().await.unwrap();
    }

    #[tokio::test]
    async fn listen_then_close_is_idempotent() {
        let (supervisor, _) = supervisor();
        let addr = supervisor.listen("127.0.0.1:0", Router::new()).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(supervisor.local_addr(), Some(addr));

        let again = supervisor.listen("127.0.0.1:0", Router::new()).await;
        assert!(matches!(again, Err(LifecycleError::Listen { .. })));

        supervisor.close_listen().await.unwrap();
        assert!(!supervisor.is_listening());
        supervisor.close_listen().await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_a_listen_error() {
        let (first, _) = supervisor();
        let addr = first.listen("127.0.0.1:0", Router::new()).await.unwrap();

        let (second, _) = supervisor();
        let err = second
            .listen(&addr.to_string(), Router::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Listen { .. }));
        first.close_listen().await.unwrap();
    }

    #[test]
    fn stopping_flag_is_set_once() {
        let (supervisor, _) = supervisor();
        assert!(supervisor.try_begin_stopping());
        assert!(!supervisor.try_begin_stopping());
        assert!(supervisor.is_stopping());
    }

    #[test]
    fn exit_goes_through_the_handler() {
        let (supervisor, code) = supervisor();
        supervisor.exit(1);
        assert_eq!(code.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signals_raised_back_to_back_are_both_seen() {
        let mut signals = SignalWatcher::new().unwrap();
        let pid = std::process::id();
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -TERM {pid}; kill -INT {pid}"))
            .status()
            .unwrap();
        assert!(status.success());

        let mut seen = Vec::new();
        for _ in 0..2 {
            let signal = tokio::time::timeout(std::time::Duration::from_secs(5), signals.recv())
                .await
                .unwrap();
            seen.extend(signal);
        }
        seen.sort_by_key(|s| s.to_string());
        assert_eq!(seen, vec![Signal::Interrupt, Signal::Terminate]);
    }

    #[test]
    fn signal_names() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
        assert_eq!(Signal::Manual.to_string(), "manual");
    }
}
