//! Lifecycle-specific error types

use super::{LifecycleState, Phase};
use crate::error::CoreError;
use thiserror::Error;

/// Errors that can occur during lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A module's setup or after callback failed
    #[error("module [{module}] ({location}) {phase} error: {source:#}")]
    SetupPhase {
        module: String,
        location: String,
        phase: Phase,
        source: anyhow::Error,
    },

    /// A module's destroy callback failed; never fatal
    #[error("module [{module}] ({location}) destroy error: {source:#}")]
    Teardown {
        module: String,
        location: String,
        source: anyhow::Error,
    },

    /// Binding the listener failed
    #[error("listen on {addr} failed: {source}")]
    Listen {
        addr: String,
        source: std::io::Error,
    },

    /// Releasing the listener failed
    #[error("close listen failed: {0}")]
    Close(String),

    /// A stop was requested while the application was already stopping
    #[error("force exit: stop requested while already stopping")]
    ForcedExit,

    /// The requested state change is not allowed from the current state
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl LifecycleError {
    /// Create a setup or after phase failure
    pub fn setup_phase(
        module: impl Into<String>,
        location: impl Into<String>,
        phase: Phase,
        source: anyhow::Error,
    ) -> Self {
        Self::SetupPhase {
            module: module.into(),
            location: location.into(),
            phase,
            source,
        }
    }

    /// Create a destroy failure
    pub fn teardown(
        module: impl Into<String>,
        location: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::Teardown {
            module: module.into(),
            location: location.into(),
            source,
        }
    }

    /// Process exit status for this error when it ends the process.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Teardown { .. } => 0,
            _ => 1,
        }
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
