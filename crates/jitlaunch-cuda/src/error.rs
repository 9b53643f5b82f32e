//! CUDA-specific errors.

use jitlaunch_core::{JitError, Stage};

/// Failures from the CUDA driver, NVRTC or the assembler.
#[derive(Debug, thiserror::Error)]
pub enum CudaError {
    /// A device context could not be created.
    #[error("CUDA device {ordinal} init failed: {msg}")]
    DeviceInit {
        /// Device ordinal.
        ordinal: usize,
        /// Driver message.
        msg: String,
    },

    /// A driver call returned an error status.
    #[error("{call} failed: {msg}")]
    Driver {
        /// Driver entry point.
        call: &'static str,
        /// Status or driver message.
        msg: String,
    },

    /// NVRTC rejected the source.
    #[error("NVRTC compilation of '{program}' failed:\n{log}")]
    Nvrtc {
        /// Program name.
        program: String,
        /// Compiler log.
        log: String,
    },

    /// The assembler exited unsuccessfully.
    #[error("ptxas failed ({status}):\n{log}")]
    Assembler {
        /// Exit status description.
        status: String,
        /// Combined assembler output.
        log: String,
    },

    /// The assembler could not be started.
    #[error("Cannot run assembler '{tool}': {source}")]
    AssemblerUnavailable {
        /// Executable that was tried.
        tool: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The CUDA libraries are not usable in this build or on this host.
    #[error("CUDA unavailable: {0}")]
    Unavailable(String),
}

impl From<CudaError> for JitError {
    fn from(e: CudaError) -> Self {
        match e {
            CudaError::Nvrtc { log, .. } => JitError::Compilation {
                stage: Stage::Assembly,
                diagnostics: log,
            },
            CudaError::Assembler { log, .. } => JitError::Compilation {
                stage: Stage::Binary,
                diagnostics: log,
            },
            other => JitError::Backend(other.to_string()),
        }
    }
}
