//! CLI command implementations.

pub mod compile;
pub mod devices;
pub mod resolve;
pub mod run;

use std::path::Path;

use clap::ValueEnum;
use jitlaunch_core::mock::{MockCompiler, MockDevice};
use jitlaunch_core::{Architecture, Dim3, JitConfig, JitRuntime, KernelSource, HELLO_ENTRY};

use crate::error::CliResult;

/// Architecture reported by the mock device when none is configured.
pub const MOCK_DEFAULT_ARCH: Architecture = Architecture::from_compute_capability(8, 0);

/// Device backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-memory compiler and device; no GPU required.
    Mock,
    /// NVRTC, ptxas and the CUDA driver.
    Cuda,
}

/// Kernel source for a command.
///
/// Without `path` the built-in hello kernel is used. An existing file is read
/// directly; any other name is looked up in the resolved kernel directory.
pub fn load_source(config: &JitConfig, path: Option<&Path>, entry: Option<&str>) -> CliResult<KernelSource> {
    let entry = entry.unwrap_or(HELLO_ENTRY);
    let source = match path {
        None => KernelSource::hello(),
        Some(path) if path.is_file() => KernelSource::from_file(path, entry)?,
        Some(path) => {
            let name = path.to_string_lossy();
            KernelSource::from_resources(&config.resolver(), &name, entry)?
        }
    };
    tracing::debug!(name = source.name(), entry = source.entry_point(), "Loaded kernel source");
    Ok(source)
}

/// Mock runtime with one device of the configured (or default) architecture.
pub fn mock_runtime(
    config: &JitConfig,
    source: KernelSource,
) -> CliResult<JitRuntime<MockCompiler, MockDevice>> {
    let arch = config.compile.arch.unwrap_or(MOCK_DEFAULT_ARCH);
    let pipeline = config.pipeline(MockCompiler::new(), MockDevice::single(arch), source)?;
    Ok(JitRuntime::new(pipeline))
}

/// Parse launch geometry: `X`, `X,Y` or `X,Y,Z`; omitted extents are 1.
pub fn parse_dim3(s: &str) -> Result<Dim3, String> {
    let parts = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<u32>()
                .map_err(|_| format!("'{}' is not a non-negative integer", p.trim()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match parts.as_slice() {
        [x] => Ok(Dim3::new(*x, 1, 1)),
        [x, y] => Ok(Dim3::new(*x, *y, 1)),
        [x, y, z] => Ok(Dim3::new(*x, *y, *z)),
        _ => Err(format!("expected 1 to 3 comma-separated extents, got '{}'", s)),
    }
}

/// Parse an architecture tag such as `sm_80`.
pub fn parse_arch(s: &str) -> Result<Architecture, String> {
    s.parse::<Architecture>().map_err(|e| e.to_string())
}
