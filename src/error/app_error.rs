use std::path::PathBuf;

use thiserror::Error;

use crate::config::error::ConfigError;
use crate::jobs::JobError;

/// Command-level error type.
///
/// Each variant maps to a message printed by the CLI; domain errors from
/// the scheduler and configuration layers are wrapped transparently.
#[derive(Error, Debug)]
pub enum AppError {
    /// No worker matched the requested schedulers
    #[error("No worker is available.")]
    NoWorkerAvailable,

    /// No scheduler is configured or matched the requested names
    #[error("No scheduler is available.")]
    NoSchedulerAvailable,

    #[error("No failed task found.")]
    NoFailedTaskFound,

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem error with the path involved
    #[error("Filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal error for unexpected failures
    #[error("Internal error: {source}")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Whether the error is reported as a warning rather than a failure
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            AppError::NoWorkerAvailable
                | AppError::NoSchedulerAvailable
                | AppError::NoFailedTaskFound
                | AppError::Job(JobError::NoTaskFound(_))
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;
