//! The compile-cache-launch pipeline.
//!
//! [`JitPipeline`] turns one kernel source into a loaded module for a device:
//!
//! ```text
//! arch(device) -> source --stage 1--> assembly -> store/reload
//!              -> assembly --stage 2--> binary -> store/reload -> load
//! ```
//!
//! It is the [`ModuleProvider`] behind a [`JitRuntime`], which caches one
//! module per device and launches kernels from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::artifact::{CompiledArtifact, KernelSource};
use crate::backend::{DeviceBackend, KernelCompiler, KernelFunction};
use crate::cache::{DeviceModuleCache, ModuleProvider};
use crate::compiler::TwoStageCompiler;
use crate::error::Result;
use crate::launch::{self, LaunchRequest};
use crate::options::CompileOptions;
use crate::store::ArtifactStore;
use crate::stream::{StreamHandle, StreamIdentity};
use crate::types::{Architecture, DeviceId};

/// Default assembly artifact file name.
pub const DEFAULT_ASSEMBLY_FILE: &str = "output.ptx";

/// Default binary artifact file name.
pub const DEFAULT_BINARY_FILE: &str = "output.cubin";

/// Builds device modules from one kernel source.
pub struct JitPipeline<C, B> {
    compiler: TwoStageCompiler<C>,
    backend: B,
    source: KernelSource,
    options: CompileOptions,
    arch_override: Option<Architecture>,
    store: ArtifactStore,
    assembly_path: PathBuf,
    binary_path: PathBuf,
    persist: bool,
    // Serializes each store + reload pair; all devices share the same paths.
    io_lock: Mutex<()>,
}

impl<C: KernelCompiler, B: DeviceBackend> JitPipeline<C, B> {
    /// Starts a builder.
    ///
    /// `options` is a template: its architecture is replaced by each device's
    /// own unless an override is set.
    pub fn builder(
        compiler: C,
        backend: B,
        source: KernelSource,
        options: CompileOptions,
    ) -> JitPipelineBuilder<C, B> {
        JitPipelineBuilder {
            pipeline: JitPipeline {
                compiler: TwoStageCompiler::new(compiler),
                backend,
                source,
                options,
                arch_override: None,
                store: ArtifactStore::new(),
                assembly_path: PathBuf::from(DEFAULT_ASSEMBLY_FILE),
                binary_path: PathBuf::from(DEFAULT_BINARY_FILE),
                persist: true,
                io_lock: Mutex::new(()),
            },
        }
    }

    /// The compiler.
    pub fn compiler(&self) -> &C {
        self.compiler.inner()
    }

    /// The device backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The kernel source.
    pub fn source(&self) -> &KernelSource {
        &self.source
    }

    /// The artifact store.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Where the assembly artifact is written.
    pub fn assembly_path(&self) -> PathBuf {
        self.store.path_for(&self.assembly_path)
    }

    /// Where the binary artifact is written.
    pub fn binary_path(&self) -> PathBuf {
        self.store.path_for(&self.binary_path)
    }

    /// Whether stage outputs are persisted and reloaded.
    pub fn persists_artifacts(&self) -> bool {
        self.persist
    }

    /// Architecture compiled for on `device`.
    pub fn target_arch(&self, device: DeviceId) -> Result<Architecture> {
        match self.arch_override {
            Some(arch) => Ok(arch),
            None => self.backend.architecture(device),
        }
    }

    /// Compile options for `device`.
    pub fn options_for(&self, device: DeviceId) -> Result<CompileOptions> {
        Ok(self.options.retargeted(self.target_arch(device)?))
    }

    /// Stage 1 only, for `arch`.
    pub fn compile_assembly(&self, arch: Architecture) -> Result<CompiledArtifact> {
        self.compiler
            .compile_to_assembly(&self.source, &self.options.retargeted(arch))
    }

    /// Both stages for `arch`, persisting intermediate results when enabled.
    pub fn compile_binary(&self, arch: Architecture) -> Result<CompiledArtifact> {
        let options = self.options.retargeted(arch);
        let assembly = self.compiler.compile_to_assembly(&self.source, &options)?;
        let assembly = self.round_trip(assembly, &self.assembly_path)?;
        let binary = self.compiler.compile_to_binary(&assembly, &options)?;
        self.round_trip(binary, &self.binary_path)
    }

    /// Compiles for `device` and loads the binary onto it.
    pub fn build_module(&self, device: DeviceId) -> Result<B::Module> {
        let arch = self.target_arch(device)?;
        tracing::info!(
            device = %device,
            arch = %arch,
            kernel = self.source.name(),
            backend = self.backend.name(),
            "Building module"
        );
        let binary = self.compile_binary(arch)?;
        self.backend.load_module(device, &binary)
    }

    fn round_trip(&self, artifact: CompiledArtifact, path: &Path) -> Result<CompiledArtifact> {
        if !self.persist {
            return Ok(artifact);
        }
        let stage = artifact.stage();
        let arch = artifact.arch();

        let _guard = self.io_lock.lock();
        self.store.store(&artifact, path)?;
        let reloaded = self.store.load(path, stage)?;
        Ok(match arch {
            Some(arch) => reloaded.with_arch(arch),
            None => reloaded,
        })
    }
}

impl<C: KernelCompiler, B: DeviceBackend> ModuleProvider for JitPipeline<C, B> {
    type Module = B::Module;

    fn device_count(&self) -> Result<usize> {
        self.backend.device_count()
    }

    fn provide(&self, device: DeviceId) -> Result<B::Module> {
        self.build_module(device)
    }
}

impl<C, B> std::fmt::Debug for JitPipeline<C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitPipeline")
            .field("source", &self.source.name())
            .field("options", &self.options)
            .field("arch_override", &self.arch_override)
            .field("persist", &self.persist)
            .finish()
    }
}

/// Builder for [`JitPipeline`].
pub struct JitPipelineBuilder<C, B> {
    pipeline: JitPipeline<C, B>,
}

impl<C: KernelCompiler, B: DeviceBackend> JitPipelineBuilder<C, B> {
    /// Compiles for `arch` regardless of the device's capability.
    #[must_use]
    pub fn with_arch_override(mut self, arch: Option<Architecture>) -> Self {
        self.pipeline.arch_override = arch;
        self
    }

    /// Sets the artifact store.
    #[must_use]
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.pipeline.store = store;
        self
    }

    /// Sets both artifact paths, relative to the store.
    #[must_use]
    pub fn with_artifact_paths(
        mut self,
        assembly: impl Into<PathBuf>,
        binary: impl Into<PathBuf>,
    ) -> Self {
        self.pipeline.assembly_path = assembly.into();
        self.pipeline.binary_path = binary.into();
        self
    }

    /// Enables or disables the store/reload step between stages.
    #[must_use]
    pub fn persist_artifacts(mut self, persist: bool) -> Self {
        self.pipeline.persist = persist;
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> JitPipeline<C, B> {
        self.pipeline
    }
}

/// Outcome of [`JitRuntime::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Device the kernel ran on.
    pub device: DeviceId,
    /// Architecture the module was built for.
    pub arch: Architecture,
    /// Registers per thread of the launched kernel.
    pub num_registers: u32,
    /// Stream the kernel was enqueued on.
    pub stream: StreamHandle,
    /// Whether the stream was synchronized after the launch.
    pub synchronized: bool,
}

/// Module cache plus launch entry points over a [`JitPipeline`].
pub struct JitRuntime<C: KernelCompiler, B: DeviceBackend> {
    cache: DeviceModuleCache<JitPipeline<C, B>>,
}

impl<C: KernelCompiler, B: DeviceBackend> JitRuntime<C, B> {
    /// Wraps a pipeline with an empty cache.
    pub fn new(pipeline: JitPipeline<C, B>) -> Self {
        Self {
            cache: DeviceModuleCache::new(pipeline),
        }
    }

    /// The pipeline.
    pub fn pipeline(&self) -> &JitPipeline<C, B> {
        self.cache.provider()
    }

    /// The device backend.
    pub fn backend(&self) -> &B {
        self.pipeline().backend()
    }

    /// The module cache.
    pub fn cache(&self) -> &DeviceModuleCache<JitPipeline<C, B>> {
        &self.cache
    }

    /// Returns the module for a raw device id, compiling on first use.
    pub fn get_module(&self, id: i64) -> Result<Arc<B::Module>> {
        self.cache.get_module(id)
    }

    /// Evicts the module for `device`; the next lookup recompiles.
    pub fn clear(&self, device: DeviceId) -> bool {
        self.cache.clear(device)
    }

    /// Evicts every module.
    pub fn clear_all(&self) -> usize {
        self.cache.clear_all()
    }

    /// Validates a raw device id against the backend.
    pub fn device(&self, id: i64) -> Result<DeviceId> {
        DeviceId::try_from_raw(id, self.backend().device_count()?)
    }

    /// Creates a native stream on a device.
    pub fn create_stream(&self, id: i64) -> Result<B::Stream> {
        let device = self.device(id)?;
        self.backend().create_stream(device)
    }

    /// Launches the request's kernel from device `id`'s module on `stream`,
    /// which may be native or foreign.
    pub fn launch<S>(&self, id: i64, request: &LaunchRequest, stream: &S) -> Result<()>
    where
        S: StreamIdentity + ?Sized,
    {
        let module = self.get_module(id)?;
        launch::launch(self.backend(), &*module, request, stream)
    }

    /// Blocks until all work on a native stream completes.
    pub fn synchronize(&self, stream: &B::Stream) -> Result<()> {
        launch::synchronize(self.backend(), stream)
    }

    /// Full flow on a fresh native stream: module, lookup, register report,
    /// launch and optional synchronize.
    pub fn run(&self, id: i64, request: &LaunchRequest, synchronize: bool) -> Result<RunReport> {
        let device = self.device(id)?;
        let arch = self.pipeline().target_arch(device)?;
        let stream = self.backend().create_stream(device)?;
        let module = self.cache.get(device)?;

        let kernel = launch::lookup_kernel(&*module, request.entry())?;
        let num_registers = kernel.num_registers()?;
        tracing::info!(
            device = %device,
            kernel = kernel.name(),
            num_registers,
            "Kernel ready"
        );

        launch::launch_kernel(self.backend(), &kernel, request, &stream)?;
        if synchronize {
            launch::synchronize(self.backend(), &stream)?;
        }

        Ok(RunReport {
            device,
            arch,
            num_registers,
            stream: stream.stream_handle(),
            synchronized: synchronize,
        })
    }
}

impl<C: KernelCompiler, B: DeviceBackend> std::fmt::Debug for JitRuntime<C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitRuntime")
            .field("pipeline", self.pipeline())
            .field("cache", &self.cache)
            .finish()
    }
}
