//! `jitlaunch run`: compile, load and launch a kernel.

use colored::Colorize;
use jitlaunch_core::{DeviceBackend, JitConfig, JitRuntime, KernelCompiler, KernelSource, RunReport};

use super::{mock_runtime, BackendKind};
use crate::error::CliResult;
#[cfg(not(feature = "cuda"))]
use crate::error::CliError;

/// Execute the run command.
pub fn execute(config: &JitConfig, backend: BackendKind, source: KernelSource) -> CliResult<()> {
    println!(
        "{} {} ({}) on device {} [{}]",
        "Running".bright_cyan().bold(),
        source.entry_point().bright_white(),
        source.name(),
        config.launch.device,
        format!("{:?}", backend).to_lowercase()
    );

    let report = match backend {
        BackendKind::Mock => run_on(&mock_runtime(config, source.clone())?, config, &source)?,
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => run_on(
            &jitlaunch_cuda::cuda_runtime(config, source.clone())?,
            config,
            &source,
        )?,
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => return Err(CliError::cuda_not_enabled()),
    };

    print_report(&report);
    Ok(())
}

fn run_on<C, B>(runtime: &JitRuntime<C, B>, config: &JitConfig, source: &KernelSource) -> CliResult<RunReport>
where
    C: KernelCompiler,
    B: DeviceBackend,
{
    let request = config.launch_request(source.entry_point());
    Ok(runtime.run(config.launch.device, &request, config.launch.synchronize)?)
}

fn print_report(report: &RunReport) {
    println!("  {:<14} {}", "Device:".dimmed(), report.device);
    println!("  {:<14} {}", "Architecture:".dimmed(), report.arch);
    println!("  {:<14} {}", "Registers:".dimmed(), report.num_registers);
    println!("  {:<14} {}", "Stream:".dimmed(), report.stream);
    if report.synchronized {
        println!("{} Kernel completed", "✓".green());
    } else {
        println!("{} Kernel enqueued (not synchronized)", "✓".green());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitlaunch_core::{Dim3, JitError};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> JitConfig {
        let mut config = JitConfig::default();
        config.artifacts.dir = Some(dir.path().to_path_buf());
        config
    }

    #[test]
    fn test_run_hello_on_mock() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        execute(&config, BackendKind::Mock, KernelSource::hello()).unwrap();
        assert!(dir.path().join("output.ptx").exists());
        assert!(dir.path().join("output.cubin").exists());
    }

    #[test]
    fn test_run_uses_configured_geometry() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.launch.grid = Dim3::new(8, 2, 1);
        config.launch.block = Dim3::new(64, 1, 1);

        let runtime = mock_runtime(&config, KernelSource::hello()).unwrap();
        let report = run_on(&runtime, &config, &KernelSource::hello()).unwrap();
        assert!(report.synchronized);

        let launches = runtime.backend().launches();
        assert_eq!(launches[0].grid, Dim3::new(8, 2, 1));
        assert_eq!(launches[0].block, Dim3::new(64, 1, 1));
    }

    #[test]
    fn test_run_rejects_unknown_device() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.launch.device = 3;
        let err = execute(&config, BackendKind::Mock, KernelSource::hello()).unwrap_err();
        assert!(matches!(err, crate::error::CliError::Jit(JitError::InvalidDevice { id: 3, .. })));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_backend_requires_feature() {
        let dir = TempDir::new().unwrap();
        let err = execute(&config_in(&dir), BackendKind::Cuda, KernelSource::hello()).unwrap_err();
        assert!(matches!(err, CliError::FeatureNotAvailable(..)));
    }
}
