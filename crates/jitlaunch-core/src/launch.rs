//! Kernel lookup, geometry validation and launch.
//!
//! Launches are fire-and-forget: they return once the work is enqueued.
//! Waiting is a separate [`synchronize`] call, only possible on streams the
//! backend created itself.

use crate::backend::{DeviceBackend, KernelArg, KernelFunction, LoadedModule};
use crate::error::{JitError, Result};
use crate::stream::StreamIdentity;
use crate::types::Dim3;

/// Kernel entry point, geometry and arguments for one launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    entry: String,
    grid: Dim3,
    block: Dim3,
    args: Vec<KernelArg>,
}

impl LaunchRequest {
    /// Single-thread launch of `entry` with no arguments.
    #[must_use]
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            grid: Dim3::new(1, 1, 1),
            block: Dim3::new(1, 1, 1),
            args: Vec::new(),
        }
    }

    /// Sets the grid geometry.
    #[must_use]
    pub fn with_grid(mut self, grid: impl Into<Dim3>) -> Self {
        self.grid = grid.into();
        self
    }

    /// Sets the block geometry.
    #[must_use]
    pub fn with_block(mut self, block: impl Into<Dim3>) -> Self {
        self.block = block.into();
        self
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: KernelArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = KernelArg>) -> Self {
        self.args.extend(args);
        self
    }

    /// Entry point name.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Grid geometry.
    #[must_use]
    pub fn grid(&self) -> Dim3 {
        self.grid
    }

    /// Block geometry.
    #[must_use]
    pub fn block(&self) -> Dim3 {
        self.block
    }

    /// Arguments in declared order.
    #[must_use]
    pub fn args(&self) -> &[KernelArg] {
        &self.args
    }

    /// Checks that every grid and block component is positive.
    pub fn validate(&self) -> Result<()> {
        if !self.grid.is_positive() {
            return Err(JitError::InvalidLaunchConfig(format!(
                "grid {} has a zero component",
                self.grid
            )));
        }
        if !self.block.is_positive() {
            return Err(JitError::InvalidLaunchConfig(format!(
                "block {} has a zero component",
                self.block
            )));
        }
        Ok(())
    }
}

/// Looks up `entry` in `module`.
pub fn lookup_kernel<M: LoadedModule>(module: &M, entry: &str) -> Result<M::Kernel> {
    module.kernel(entry)?.ok_or_else(|| JitError::KernelNotFound {
        name: entry.to_string(),
    })
}

/// Looks up the request's kernel and enqueues it on `stream`.
///
/// A missing kernel or a zero geometry component fails before anything
/// reaches the device.
pub fn launch<B, S>(
    backend: &B,
    module: &B::Module,
    request: &LaunchRequest,
    stream: &S,
) -> Result<()>
where
    B: DeviceBackend + ?Sized,
    S: StreamIdentity + ?Sized,
{
    let kernel = lookup_kernel(module, request.entry())?;
    launch_kernel(backend, &kernel, request, stream)
}

/// Enqueues an already looked-up kernel on `stream`.
pub fn launch_kernel<B, S>(
    backend: &B,
    kernel: &<B::Module as LoadedModule>::Kernel,
    request: &LaunchRequest,
    stream: &S,
) -> Result<()>
where
    B: DeviceBackend + ?Sized,
    S: StreamIdentity + ?Sized,
{
    request.validate()?;
    let handle = stream.stream_handle();

    tracing::debug!(
        backend = backend.name(),
        kernel = kernel.name(),
        stream = %handle,
        grid = %request.grid(),
        block = %request.block(),
        args = request.args().len(),
        "Launching kernel"
    );
    backend.launch(kernel, handle, request.grid(), request.block(), request.args())
}

/// Blocks until all work on a backend-created stream completes.
pub fn synchronize<B: DeviceBackend + ?Sized>(backend: &B, stream: &B::Stream) -> Result<()> {
    backend.synchronize(stream)?;
    tracing::trace!(stream = %stream.stream_handle(), "Stream synchronized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::CompiledArtifact;
    use crate::mock::{MockDevice, MOCK_BINARY_MAGIC};
    use crate::stream::{ForeignStream, StreamHandle};
    use crate::types::{Architecture, DeviceId, Stage};

    fn setup() -> (MockDevice, crate::mock::MockModule) {
        let arch = Architecture::from_compute_capability(8, 0);
        let device = MockDevice::single(arch);
        let mut bytes = MOCK_BINARY_MAGIC.to_vec();
        bytes.extend_from_slice(b"sm_80\nhello\nadd");
        let module = device
            .load_module(DeviceId::new(0), &CompiledArtifact::new(Stage::Binary, arch, bytes))
            .unwrap();
        (device, module)
    }

    #[test]
    fn test_missing_kernel_never_launches() {
        let (device, module) = setup();
        let stream = device.create_stream(DeviceId::new(0)).unwrap();

        let err = launch(&device, &module, &LaunchRequest::new("nope"), &stream).unwrap_err();
        assert!(matches!(err, JitError::KernelNotFound { name } if name == "nope"));
        assert!(device.launches().is_empty());
    }

    #[test]
    fn test_zero_geometry_rejected() {
        let (device, module) = setup();
        let stream = device.create_stream(DeviceId::new(0)).unwrap();

        let request = LaunchRequest::new("hello").with_grid((4u32, 0u32));
        let err = launch(&device, &module, &request, &stream).unwrap_err();
        assert!(matches!(err, JitError::InvalidLaunchConfig(_)));

        let request = LaunchRequest::new("hello").with_block(0u32);
        assert!(launch(&device, &module, &request, &stream).is_err());
        assert!(device.launches().is_empty());
    }

    #[test]
    fn test_args_passed_in_order() {
        let (device, module) = setup();
        let stream = device.create_stream(DeviceId::new(0)).unwrap();
        let request = LaunchRequest::new("add")
            .with_grid(2u32)
            .with_block((32u32, 4u32))
            .with_args([KernelArg::DevicePtr(0xdead_0000), KernelArg::I32(7)])
            .with_arg(KernelArg::F32(0.5));

        launch(&device, &module, &request, &stream).unwrap();
        synchronize(&device, &stream).unwrap();

        let launches = device.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].kernel, "add");
        assert_eq!(launches[0].block, Dim3::new(32, 4, 1));
        assert_eq!(
            launches[0].args,
            vec![
                KernelArg::DevicePtr(0xdead_0000),
                KernelArg::I32(7),
                KernelArg::F32(0.5)
            ]
        );
        assert_eq!(device.syncs(), 1);
    }

    #[test]
    fn test_launch_on_foreign_stream() {
        struct Framework(u64);
        impl crate::stream::NativeStreamSource for Framework {
            fn native_stream_id(&self) -> u64 {
                self.0
            }
            fn context_id(&self) -> u64 {
                0
            }
        }

        let (device, module) = setup();
        let owner = Framework(0x7f00_1234);
        let view = ForeignStream::borrow(&owner);

        launch(&device, &module, &LaunchRequest::new("hello"), &view).unwrap();
        assert_eq!(device.launches()[0].stream, StreamHandle::new(0, 0x7f00_1234));
        assert_eq!(device.syncs(), 0);
    }
}
