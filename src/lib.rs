//! # modcore
//!
//! A module lifecycle bootstrapper for axum HTTP services.
//!
//! An application is composed out of modules. Each module is an async
//! function (or a type implementing [`Module`]) that receives a
//! [`SetupHandle`] during boot and uses it to:
//!
//! - install properties on the application or on every request context
//! - add middleware and routes
//! - register an `after` callback, run once every module is set up
//! - register a `destroy` callback, run at shutdown in reverse order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modcore::prelude::*;
//!
//! async fn greeting(setup: SetupHandle) -> anyhow::Result<()> {
//!     setup.define_core_property("greeting", PropertyDescriptor::value("hello".to_string()))?;
//!     setup.routes(Router::new().route("/", get(|| async { "hello" })))?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Application::new(AppOptions::default());
//!     app.setup(greeting)?;
//!     app.start(None).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod global;
pub mod http;
pub mod lifecycle;
pub mod module;
pub mod property;
pub mod setup;

// Re-export core types
pub use config::{AppOptions, ConfigService};
pub use context::Context;
pub use error::{CoreError, Result};
pub use global::{app, context, current_context, init_app, init_app_with};
pub use lifecycle::{Application, ApplicationBuilder, LifecycleError, LifecycleState, Signal};
pub use module::{Module, ModuleInfo, SetupOptions};
pub use property::{
    ContextProperty, CoreProperty, Property, PropertyDescriptor, PropertyHost, PropertyTarget,
};
pub use setup::SetupHandle;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use modcore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{AppOptions, ConfigService};
    pub use crate::context::Context;
    pub use crate::error::CoreError;
    pub use crate::lifecycle::{Application, LifecycleError, LifecycleState, Signal};
    pub use crate::module::{Module, SetupOptions};
    pub use crate::property::{ContextProperty, CoreProperty, PropertyDescriptor, PropertyHost};
    pub use crate::setup::SetupHandle;
    pub use async_trait::async_trait;
    pub use axum::{
        Json, Router,
        extract::Request,
        http::StatusCode,
        middleware::Next,
        response::{IntoResponse, Response},
        routing::get,
    };
    pub use std::sync::Arc;
}
