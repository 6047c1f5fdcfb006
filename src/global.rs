//! Process-wide default application.
//!
//! Code that has no handle to the application, such as a helper called deep
//! inside a request handler, can reach it through [`app`] and the current
//! request through [`context`].

use crate::config::AppOptions;
use crate::context::Context;
use crate::error::{CoreError, Result};
use crate::lifecycle::{Application, ApplicationBuilder};
use std::sync::OnceLock;

static APP: OnceLock<Application> = OnceLock::new();

/// Creates the default application. Fails if it already exists.
pub fn init_app(options: AppOptions) -> Result<Application> {
    init_app_with(Application::builder().options(options))
}

/// [`init_app`] with a fully configured builder.
pub fn init_app_with(builder: ApplicationBuilder) -> Result<Application> {
    if APP.get().is_some() {
        return Err(CoreError::AlreadyInitialized);
    }
    let app = builder.build();
    APP.set(app.clone())
        .map_err(|_| CoreError::AlreadyInitialized)?;
    Ok(app)
}

/// The default application.
pub fn app() -> Result<Application> {
    APP.get().cloned().ok_or(CoreError::NotInitialized)
}

/// The context of the request handled by the current task, if any.
pub fn current_context() -> Option<Context> {
    Context::current()
}

/// Like [`current_context`], but outside a request is an error.
pub fn context() -> Result<Context> {
    current_context().ok_or(CoreError::MissingContext)
}
