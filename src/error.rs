use crate::property::PropertyTarget;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while composing an application out of modules.
///
/// Everything here is raised synchronously at registration or install time.
/// Module code usually propagates these with `?` into its own
/// `anyhow::Result`, which turns them into a setup-phase failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("define {target} property [{name}] duplicated")]
    DuplicateProperty { target: PropertyTarget, name: String },

    #[error("{message}")]
    Precondition { message: String },

    #[error("{target} property [{name}] is not defined")]
    PropertyNotFound { target: PropertyTarget, name: String },

    #[error("{target} property [{name}] is not a `{expected}`")]
    PropertyType {
        target: PropertyTarget,
        name: String,
        expected: &'static str,
    },

    #[error("application instance already exists")]
    AlreadyInitialized,

    #[error("application instance does not exist")]
    NotInitialized,

    #[error("request handler has already been taken")]
    HandlerTaken,

    #[error("no request context in the current task")]
    MissingContext,
}

impl CoreError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// True for the errors that signal a broken composition of modules:
    /// unnamed or duplicate modules and duplicate property definitions.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::DuplicateProperty { .. }
        )
    }

    pub fn is_precondition_error(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}
