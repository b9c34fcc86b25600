//! Application-level error type for the boot sequence.

use thiserror::Error;

/// Failures that abort the boot sequence or the serve loop.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(#[from] fetcharr_config::ConfigError),

    /// A component failed to initialise.
    #[error("{component} initialisation failed: {source}")]
    Init {
        /// Component that failed.
        component: &'static str,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },

    /// A component failed while running.
    #[error("{component} failed: {source}")]
    Runtime {
        /// Component that failed.
        component: &'static str,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub(crate) fn init(component: &'static str, source: anyhow::Error) -> Self {
        Self::Init { component, source }
    }

    pub(crate) fn runtime(component: &'static str, source: anyhow::Error) -> Self {
        Self::Runtime { component, source }
    }
}

/// Result alias for the boot sequence.
pub type AppResult<T> = Result<T, AppError>;
