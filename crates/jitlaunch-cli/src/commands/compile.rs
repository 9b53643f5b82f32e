//! `jitlaunch compile`: emit the assembly or binary artifact for a device.

use std::path::{Path, PathBuf};

use colored::Colorize;
use jitlaunch_core::{
    ArtifactStore, DeviceBackend, JitConfig, JitRuntime, KernelCompiler, KernelSource, Stage,
};

use super::{mock_runtime, BackendKind};
use crate::error::CliResult;
#[cfg(not(feature = "cuda"))]
use crate::error::CliError;

/// Execute the compile command.
pub fn execute(
    config: &JitConfig,
    backend: BackendKind,
    source: KernelSource,
    stage: Stage,
    output: Option<&Path>,
) -> CliResult<()> {
    let written = match backend {
        BackendKind::Mock => compile_on(&mock_runtime(config, source)?, config, stage, output)?,
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => compile_on(
            &jitlaunch_cuda::cuda_runtime(config, source)?,
            config,
            stage,
            output,
        )?,
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => return Err(CliError::cuda_not_enabled()),
    };

    println!(
        "{} {} written to {}",
        "✓".green(),
        stage,
        written.display().to_string().bright_white()
    );
    Ok(())
}

/// Compiles for the configured device and returns the path written.
fn compile_on<C, B>(
    runtime: &JitRuntime<C, B>,
    config: &JitConfig,
    stage: Stage,
    output: Option<&Path>,
) -> CliResult<PathBuf>
where
    C: KernelCompiler,
    B: DeviceBackend,
{
    let pipeline = runtime.pipeline();
    let device = runtime.device(config.launch.device)?;
    let arch = pipeline.target_arch(device)?;
    tracing::info!(device = %device, arch = %arch, stage = %stage, "Compiling");

    let (artifact, default_path) = match stage {
        Stage::Assembly => (pipeline.compile_assembly(arch)?, pipeline.assembly_path()),
        Stage::Binary => (pipeline.compile_binary(arch)?, pipeline.binary_path()),
    };

    // Binary builds already persisted both stages at the default paths.
    let already_stored = output.is_none() && stage == Stage::Binary && pipeline.persists_artifacts();
    let dest = output.map(Path::to_path_buf).unwrap_or(default_path);
    if !already_stored {
        ArtifactStore::new().store(&artifact, &dest)?;
    }
    Ok(dest)
}
