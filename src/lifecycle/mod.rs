//! Lifecycle Module
//!
//! Boots registered modules, serves HTTP, and tears everything down again on
//! a termination signal.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Module Registration      app.setup(m)            (order recorded)
//!    ↓
//! 2. Setup                    m.setup(handle)         ascending order
//!    ↓
//! 3. After                    handle.after(..)        ascending order
//!    ↓
//! 4. Listen                   app.listen(port)
//!    ↓
//! [Running...]
//!    ↓
//! 5. Stop Signal (SIGTERM/SIGINT)
//!    ↓
//! 6. Close Listen
//!    ↓
//! 7. Destroy                  handle.destroy(..)      descending order
//!    ↓
//! 8. Stopped
//! ```
//!
//! Setup and after failures are fatal: the process exits with status 1.
//! Destroy failures are logged and the remaining modules are still
//! destroyed. A second stop request while stopping forces the exit.
//!
//! # Example
//!
//! ```rust,ignore
//! use modcore::{Application, AppOptions, SetupHandle, PropertyDescriptor};
//!
//! async fn database(setup: SetupHandle) -> anyhow::Result<()> {
//!     let pool = Pool::connect("postgres://...").await?;
//!     setup.define_core_property("db", PropertyDescriptor::value(pool.clone()))?;
//!     setup.destroy(move || async move {
//!         tracing::info!("Closing database connections");
//!         pool.close().await;
//!         Ok(())
//!     });
//!     Ok(())
//! }
//!
//! let app = Application::new(AppOptions::default());
//! app.setup(database)?;
//! app.start(None).await?;
//! ```

mod application;
mod error;
mod orchestrator;
mod state;
mod supervisor;

pub use application::{Application, ApplicationBuilder};
pub use error::{LifecycleError, Result};
pub use orchestrator::LifecycleOrchestrator;
pub use state::{LifecycleState, Phase};
pub use supervisor::{ExitHandler, ProcessSupervisor, Signal};
