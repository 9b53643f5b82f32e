//! CUDA backend for jitlaunch.
//!
//! Implements the two compile stages and the device primitives over the CUDA
//! toolkit:
//!
//! - CUDA C++ to PTX with NVRTC (through cudarc)
//! - PTX to cubin with the toolkit's `ptxas`
//! - cubin loading, kernel lookup and launch through the driver API
//!
//! # Requirements
//!
//! - NVIDIA driver and CUDA Toolkit 11.0+ (NVRTC and `ptxas`)
//! - Build with the `cuda` feature; without it only the assembler wrapper
//!   and the availability probes are compiled, and the probes report no
//!   devices.
//!
//! # Example
//!
//! ```ignore
//! use jitlaunch_core::{JitConfig, JitRuntime, KernelSource};
//! use jitlaunch_cuda::{CudaBackend, NvrtcCompiler};
//!
//! let config = JitConfig::default();
//! let compiler = NvrtcCompiler::new(config.resolver().toolkit());
//! let pipeline = config.pipeline(compiler, CudaBackend::new()?, KernelSource::hello())?;
//! let runtime = JitRuntime::new(pipeline);
//! let report = runtime.run(0, &config.launch_request("hello"), true)?;
//! println!("{} registers", report.num_registers);
//! ```

#![warn(missing_docs)]

pub mod assembler;
pub mod error;

#[cfg(feature = "cuda")]
pub mod backend;
#[cfg(feature = "cuda")]
pub mod compiler;
#[cfg(feature = "cuda")]
pub mod context;
#[cfg(feature = "cuda")]
pub mod module;
#[cfg(feature = "cuda")]
pub mod stream;

pub use assembler::{PtxAssembler, PTXAS};
pub use error::CudaError;

#[cfg(feature = "cuda")]
pub use backend::CudaBackend;
#[cfg(feature = "cuda")]
pub use compiler::NvrtcCompiler;
#[cfg(feature = "cuda")]
pub use context::ContextRegistry;
#[cfg(feature = "cuda")]
pub use module::{CudaKernel, CudaModule};
#[cfg(feature = "cuda")]
pub use stream::CudaStream;

#[cfg(feature = "cuda")]
use jitlaunch_core::{JitConfig, JitRuntime, KernelSource, Result};

/// Runtime over NVRTC and the CUDA driver, configured from `config`.
#[cfg(feature = "cuda")]
pub fn cuda_runtime(
    config: &JitConfig,
    source: KernelSource,
) -> Result<JitRuntime<NvrtcCompiler, CudaBackend>> {
    let compiler = NvrtcCompiler::new(config.resolver().toolkit());
    let pipeline = config.pipeline(compiler, CudaBackend::new()?, source)?;
    Ok(JitRuntime::new(pipeline))
}

// Placeholder when the `cuda` feature is disabled.
#[cfg(not(feature = "cuda"))]
mod stub {
    use jitlaunch_core::Result;

    use crate::error::CudaError;

    /// Stub CUDA backend when the `cuda` feature is disabled.
    #[derive(Debug)]
    pub struct CudaBackend;

    impl CudaBackend {
        /// Always fails: the crate was built without CUDA support.
        pub fn new() -> Result<Self> {
            Err(CudaError::Unavailable("CUDA feature not enabled".to_string()).into())
        }
    }
}

#[cfg(not(feature = "cuda"))]
pub use stub::CudaBackend;

/// Check if CUDA is available at runtime.
///
/// Returns false when the `cuda` feature is disabled, the driver library is
/// missing or no device is present. cudarc panics when the driver library
/// cannot be loaded; the panic is caught here.
pub fn is_cuda_available() -> bool {
    cuda_device_count() > 0
}

/// Number of CUDA devices; 0 when CUDA is not usable.
pub fn cuda_device_count() -> usize {
    #[cfg(feature = "cuda")]
    {
        std::panic::catch_unwind(|| {
            cudarc::driver::CudaContext::device_count().unwrap_or(0).max(0) as usize
        })
        .unwrap_or(0)
    }
    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}
