//! `jitlaunch devices`: list visible devices and their architectures.

use colored::Colorize;
use jitlaunch_core::mock::MockDevice;
use jitlaunch_core::{Architecture, DeviceBackend, DeviceId, JitConfig};

use super::{BackendKind, MOCK_DEFAULT_ARCH};
use crate::error::CliResult;
#[cfg(not(feature = "cuda"))]
use crate::error::CliError;

/// One row of the device listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device id.
    pub id: DeviceId,
    /// Architecture tag.
    pub arch: Architecture,
    /// Human-readable name, when the backend reports one.
    pub name: Option<String>,
}

/// Execute the devices command.
pub fn execute(config: &JitConfig, backend: BackendKind) -> CliResult<()> {
    let devices = match backend {
        BackendKind::Mock => {
            let arch = config.compile.arch.unwrap_or(MOCK_DEFAULT_ARCH);
            list(&MockDevice::single(arch), |_| None)?
        }
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => {
            let cuda = jitlaunch_cuda::CudaBackend::new()?;
            list(&cuda, |id| cuda.device_name(id).ok())?
        }
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => return Err(CliError::cuda_not_enabled()),
    };

    if devices.is_empty() {
        println!("{} No devices found", "Warning:".yellow());
        return Ok(());
    }

    println!("{}", "Devices:".bright_cyan().bold());
    for device in &devices {
        println!(
            "  [{}] {} {}",
            device.id,
            device.arch.to_string().bright_white(),
            device.name.as_deref().unwrap_or("").dimmed()
        );
    }
    Ok(())
}

/// Enumerates every device the backend reports.
pub fn list<B, N>(backend: &B, name: N) -> CliResult<Vec<DeviceInfo>>
where
    B: DeviceBackend,
    N: Fn(DeviceId) -> Option<String>,
{
    let count = backend.device_count()?;
    let mut devices = Vec::with_capacity(count);
    for ordinal in 0..count {
        let id = DeviceId::new(ordinal as u32);
        devices.push(DeviceInfo {
            id,
            arch: backend.architecture(id)?,
            name: name(id),
        });
    }
    Ok(devices)
}
