//! Error types for the jitlaunch CLI.

use thiserror::Error;

use jitlaunch_core::JitError;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// IO error while writing output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline failure.
    #[error(transparent)]
    Jit(#[from] JitError),

    /// Invalid command-line value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Feature not available.
    #[error("Feature not available: {0}. Enable with --features {1}")]
    FeatureNotAvailable(String, String),
}

impl CliError {
    /// Error for a CUDA request in a build without the `cuda` feature.
    #[cfg_attr(feature = "cuda", allow(dead_code))]
    pub fn cuda_not_enabled() -> Self {
        CliError::FeatureNotAvailable("CUDA backend".to_string(), "cuda".to_string())
    }
}
