//! Seams to the device toolkit.
//!
//! The pipeline never talks to a driver directly. A [`KernelCompiler`] turns
//! text into bytes for one stage, and a [`DeviceBackend`] enumerates devices,
//! loads binaries into modules, launches kernels and synchronizes streams.
//! `jitlaunch-cuda` implements both over cudarc; [`crate::mock`] implements
//! them in memory for tests.

use std::sync::Arc;

use crate::artifact::CompiledArtifact;
use crate::error::Result;
use crate::options::CompileOptions;
use crate::stream::{StreamHandle, StreamIdentity};
use crate::types::{Architecture, DeviceId, Dialect, Dim3, Stage};

/// One invocation of the compile primitive.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Program name used in diagnostics.
    pub name: &'a str,
    /// Source text.
    pub code: &'a str,
    /// Dialect of `code`.
    pub dialect: Dialect,
    /// Stage to produce.
    pub target: Stage,
    /// Options for this stage.
    pub options: &'a CompileOptions,
}

/// Output of a successful compile.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Produced bytes.
    pub bytes: Vec<u8>,
    /// Diagnostic log (warnings, info); may be empty.
    pub log: String,
}

/// Compile primitive: text in, bytes out.
///
/// Failures are reported as [`crate::JitError::Compilation`] with the raw
/// diagnostic log.
pub trait KernelCompiler: Send + Sync {
    /// Compiles `request.code` to `request.target`.
    fn compile(&self, request: CompileRequest<'_>) -> Result<CompileOutput>;
}

impl<C: KernelCompiler + ?Sized> KernelCompiler for Arc<C> {
    fn compile(&self, request: CompileRequest<'_>) -> Result<CompileOutput> {
        (**self).compile(request)
    }
}

/// A kernel argument passed by value.
///
/// Device pointers are raw addresses; composite types are not marshalled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// Raw device pointer.
    DevicePtr(u64),
    /// 32-bit signed integer.
    I32(i32),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit unsigned integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl KernelArg {
    /// Size of the value as passed to the kernel.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            KernelArg::I32(_) | KernelArg::U32(_) | KernelArg::F32(_) => 4,
            KernelArg::DevicePtr(_) | KernelArg::I64(_) | KernelArg::U64(_) | KernelArg::F64(_) => 8,
        }
    }
}

/// A kernel entry point inside a loaded module.
pub trait KernelFunction: Send + Sync {
    /// Entry-point name.
    fn name(&self) -> &str;

    /// Registers used per thread.
    fn num_registers(&self) -> Result<u32>;
}

/// A binary loaded on one device.
pub trait LoadedModule: Send + Sync {
    /// Kernel handle type.
    type Kernel: KernelFunction;

    /// Device this module is bound to.
    fn device(&self) -> DeviceId;

    /// Looks up a kernel by name; `None` when the module has no such entry.
    fn kernel(&self, name: &str) -> Result<Option<Self::Kernel>>;
}

/// Device, module and stream primitives.
pub trait DeviceBackend: Send + Sync {
    /// Loaded module type.
    type Module: LoadedModule;
    /// Natively created stream type.
    type Stream: StreamIdentity + Send + Sync;

    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Number of devices visible to the process.
    fn device_count(&self) -> Result<usize>;

    /// Architecture of a device, from its compute capability.
    fn architecture(&self, device: DeviceId) -> Result<Architecture>;

    /// Creates a stream on a device.
    fn create_stream(&self, device: DeviceId) -> Result<Self::Stream>;

    /// Loads binary bytes into a module bound to `device`.
    fn load_module(&self, device: DeviceId, binary: &CompiledArtifact) -> Result<Self::Module>;

    /// Enqueues a kernel on the stream identified by `stream`.
    ///
    /// `args` are passed in order; `stream` may come from a foreign runtime.
    fn launch(
        &self,
        kernel: &<Self::Module as LoadedModule>::Kernel,
        stream: StreamHandle,
        grid: Dim3,
        block: Dim3,
        args: &[KernelArg],
    ) -> Result<()>;

    /// Blocks until all work on a native stream completes.
    fn synchronize(&self, stream: &Self::Stream) -> Result<()>;
}

impl<B: DeviceBackend + ?Sized> DeviceBackend for Arc<B> {
    type Module = B::Module;
    type Stream = B::Stream;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn device_count(&self) -> Result<usize> {
        (**self).device_count()
    }

    fn architecture(&self, device: DeviceId) -> Result<Architecture> {
        (**self).architecture(device)
    }

    fn create_stream(&self, device: DeviceId) -> Result<Self::Stream> {
        (**self).create_stream(device)
    }

    fn load_module(&self, device: DeviceId, binary: &CompiledArtifact) -> Result<Self::Module> {
        (**self).load_module(device, binary)
    }

    fn launch(
        &self,
        kernel: &<Self::Module as LoadedModule>::Kernel,
        stream: StreamHandle,
        grid: Dim3,
        block: Dim3,
        args: &[KernelArg],
    ) -> Result<()> {
        (**self).launch(kernel, stream, grid, block, args)
    }

    fn synchronize(&self, stream: &Self::Stream) -> Result<()> {
        (**self).synchronize(stream)
    }
}
