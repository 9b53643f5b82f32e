//! Core of the jitlaunch JIT pipeline.
//!
//! Compiles GPU kernel source through portable assembly (PTX) to a device
//! binary (cubin), caches one loaded module per device, and launches kernels
//! on native streams or on streams owned by another runtime.
//!
//! # Components
//!
//! - [`resolver`]: locate kernel sources and include directories across the
//!   in-place and packaged layouts, plus the toolkit includes
//! - [`compiler`]: source to assembly, assembly to binary
//! - [`store`]: persist and reload artifacts as raw bytes
//! - [`cache`]: per-device module cache with single-flight loading
//! - [`stream`]: native stream identity and foreign-stream views
//! - [`launch`]: kernel lookup, geometry validation and launch
//! - [`pipeline`]: all of the above composed into [`JitRuntime`]
//!
//! The toolkit itself sits behind the [`KernelCompiler`] and
//! [`DeviceBackend`] traits. `jitlaunch-cuda` implements them over the CUDA
//! driver; [`mock`] implements them in memory.
//!
//! # Example
//!
//! ```
//! use jitlaunch_core::prelude::*;
//! use jitlaunch_core::mock::{MockCompiler, MockDevice};
//!
//! let sm80 = Architecture::from_compute_capability(8, 0);
//! let pipeline = JitPipeline::builder(
//!     MockCompiler::new(),
//!     MockDevice::single(sm80),
//!     KernelSource::hello(),
//!     CompileOptions::builder(sm80).with_std("c++17").build(),
//! )
//! .persist_artifacts(false)
//! .build();
//!
//! let runtime = JitRuntime::new(pipeline);
//! let report = runtime.run(0, &LaunchRequest::new("hello"), true)?;
//! assert_eq!(report.arch.to_string(), "sm_80");
//! # Ok::<(), jitlaunch_core::JitError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod artifact;
pub mod backend;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod launch;
pub mod mock;
pub mod options;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod stream;
pub mod types;

pub use artifact::{CompiledArtifact, KernelSource, HELLO_ENTRY, HELLO_KERNEL};
pub use backend::{
    CompileOutput, CompileRequest, DeviceBackend, KernelArg, KernelCompiler, KernelFunction,
    LoadedModule,
};
pub use cache::{CacheStats, DeviceModuleCache, ModuleProvider};
pub use compiler::TwoStageCompiler;
pub use config::{load_config, load_config_from_str, JitConfig};
pub use error::{JitError, Result};
pub use launch::LaunchRequest;
pub use options::{CompileOptions, CompileOptionsBuilder};
pub use pipeline::{JitPipeline, JitPipelineBuilder, JitRuntime, RunReport};
pub use resolver::{LayoutRoot, ResourceCategory, ResourceResolver, ToolkitLocator};
pub use store::ArtifactStore;
pub use stream::{ForeignStream, NativeStreamSource, StreamHandle, StreamIdentity};
pub use types::{Architecture, DeviceId, Dialect, Dim3, ExecutionSpace, Stage};

/// Commonly used items.
pub mod prelude {
    pub use crate::artifact::{CompiledArtifact, KernelSource};
    pub use crate::backend::{DeviceBackend, KernelArg, KernelCompiler, KernelFunction, LoadedModule};
    pub use crate::cache::DeviceModuleCache;
    pub use crate::config::JitConfig;
    pub use crate::error::{JitError, Result};
    pub use crate::launch::LaunchRequest;
    pub use crate::options::CompileOptions;
    pub use crate::pipeline::{JitPipeline, JitRuntime};
    pub use crate::resolver::{ResourceCategory, ResourceResolver};
    pub use crate::store::ArtifactStore;
    pub use crate::stream::{ForeignStream, StreamHandle, StreamIdentity};
    pub use crate::types::{Architecture, DeviceId, Dim3, Stage};
}
