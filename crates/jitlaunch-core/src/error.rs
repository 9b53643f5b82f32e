//! Error types for the JIT pipeline.
//!
//! Every failure in the pipeline is terminal for the current request: none of
//! these errors is recovered inside the crate, they surface to the caller of
//! the top-level entry point unchanged.

use std::path::PathBuf;

use crate::resolver::ResourceCategory;
use crate::types::Stage;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, JitError>;

/// Errors produced while resolving, compiling, persisting, loading or
/// launching kernels.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// No candidate layout produced an existing directory for a category.
    #[error("Resource directory not found for '{category}' (searched: {})", display_paths(.searched))]
    ResourceNotFound {
        /// Category that failed to resolve.
        category: ResourceCategory,
        /// Every path that was probed, in priority order.
        searched: Vec<PathBuf>,
    },

    /// A resource category name outside the fixed set was requested.
    #[error("Unknown resource category: '{0}'")]
    UnknownResourceCategory(String),

    /// A compile stage reported diagnostics and produced no output.
    #[error("Compilation to {stage} failed:\n{diagnostics}")]
    Compilation {
        /// Stage that failed.
        stage: Stage,
        /// Raw diagnostic log from the compiler.
        diagnostics: String,
    },

    /// A text-mode artifact contained invalid UTF-8.
    #[error("Artifact at {} is not valid UTF-8: {source}", .path.display())]
    Decoding {
        /// Path the bytes were read from (empty for in-memory artifacts).
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: std::str::Utf8Error,
    },

    /// No artifact exists at the requested path.
    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// Device identifier is negative or beyond the available devices.
    #[error("Invalid device id {id} ({available} device(s) available)")]
    InvalidDevice {
        /// Requested identifier.
        id: i64,
        /// Number of devices the backend reports.
        available: usize,
    },

    /// The module has no kernel with the requested entry-point name.
    #[error("Kernel '{name}' not found in module")]
    KernelNotFound {
        /// Requested entry point.
        name: String,
    },

    /// Grid or block geometry has a zero component.
    #[error("Invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// An architecture tag could not be parsed.
    #[error("Invalid architecture '{0}' (expected sm_<major><minor>)")]
    InvalidArchitecture(String),

    /// Filesystem failure while persisting or reading an artifact.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The device backend reported a failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl JitError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for compile-stage failures.
    #[must_use]
    pub fn is_compilation(&self) -> bool {
        matches!(self, Self::Compilation { .. })
    }
}

impl From<config::ConfigError> for JitError {
    fn from(e: config::ConfigError) -> Self {
        JitError::Config(e.to_string())
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
