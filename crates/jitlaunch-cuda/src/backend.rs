//! [`DeviceBackend`] over the CUDA driver API.

use std::ffi::c_void;

use cudarc::driver::sys as cuda_sys;

use jitlaunch_core::{
    Architecture, CompiledArtifact, DeviceBackend, DeviceId, Dim3, JitError, KernelArg, Result,
    Stage, StreamHandle,
};

use crate::context::ContextRegistry;
use crate::error::CudaError;
use crate::module::{CudaKernel, CudaModule};
use crate::stream::CudaStream;

/// CUDA driver backend. Contexts are created per device on first use.
#[derive(Debug, Default)]
pub struct CudaBackend {
    contexts: ContextRegistry,
}

impl CudaBackend {
    /// Creates a backend, failing when no CUDA device is usable.
    pub fn new() -> Result<Self> {
        if !crate::is_cuda_available() {
            return Err(CudaError::Unavailable("no CUDA device or driver found".to_string()).into());
        }
        Ok(Self::default())
    }

    /// Context registry.
    #[must_use]
    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// Device name.
    pub fn device_name(&self, device: DeviceId) -> Result<String> {
        self.contexts.name(device)
    }
}

impl DeviceBackend for CudaBackend {
    type Module = CudaModule;
    type Stream = CudaStream;

    fn name(&self) -> &str {
        "cuda"
    }

    fn device_count(&self) -> Result<usize> {
        std::panic::catch_unwind(cudarc::driver::CudaContext::device_count)
            .map_err(|_| CudaError::Unavailable("CUDA driver library not found".to_string()))?
            .map(|count| count.max(0) as usize)
            .map_err(|e| {
                CudaError::Driver {
                    call: "cuDeviceGetCount",
                    msg: e.to_string(),
                }
                .into()
            })
    }

    fn architecture(&self, device: DeviceId) -> Result<Architecture> {
        self.contexts.architecture(device)
    }

    fn create_stream(&self, device: DeviceId) -> Result<CudaStream> {
        let ctx = self.contexts.get(device)?;
        let stream = ctx.new_stream().map_err(|e| CudaError::Driver {
            call: "cuStreamCreate",
            msg: e.to_string(),
        })?;
        Ok(CudaStream::new(device, stream))
    }

    fn load_module(&self, device: DeviceId, binary: &CompiledArtifact) -> Result<CudaModule> {
        if binary.stage() != Stage::Binary {
            return Err(JitError::Backend(format!(
                "expected a {} artifact, got {}",
                Stage::Binary,
                binary.stage()
            )));
        }
        let ctx = self.contexts.bind(device)?;
        CudaModule::load(device, ctx, binary.bytes())
    }

    fn launch(
        &self,
        kernel: &CudaKernel,
        stream: StreamHandle,
        grid: Dim3,
        block: Dim3,
        args: &[KernelArg],
    ) -> Result<()> {
        let device = kernel.device();
        if !stream.is_default_stream() && stream.context_id != u64::from(device.ordinal()) {
            return Err(JitError::Backend(format!(
                "stream {} belongs to another context than device {}",
                stream, device
            )));
        }

        kernel.context().bind_to_thread().map_err(|e| CudaError::Driver {
            call: "cuCtxSetCurrent",
            msg: e.to_string(),
        })?;

        let mut values = args.to_vec();
        let mut params: Vec<*mut c_void> = values
            .iter_mut()
            .map(|arg| match arg {
                KernelArg::DevicePtr(v) | KernelArg::U64(v) => v as *mut u64 as *mut c_void,
                KernelArg::I32(v) => v as *mut i32 as *mut c_void,
                KernelArg::U32(v) => v as *mut u32 as *mut c_void,
                KernelArg::I64(v) => v as *mut i64 as *mut c_void,
                KernelArg::F32(v) => v as *mut f32 as *mut c_void,
                KernelArg::F64(v) => v as *mut f64 as *mut c_void,
            })
            .collect();

        let raw_stream = stream.native_id as usize as cuda_sys::CUstream;
        // SAFETY: every parameter pointer refers into `values`, which outlives
        // the call; the stream handle is vouched for by its StreamIdentity.
        unsafe {
            cudarc::driver::result::launch_kernel(
                kernel.raw_function(),
                grid.as_tuple(),
                block.as_tuple(),
                0,
                raw_stream,
                &mut params,
            )
        }
        .map_err(|e| CudaError::Driver {
            call: "cuLaunchKernel",
            msg: format!("{:?}", e),
        })?;
        Ok(())
    }

    fn synchronize(&self, stream: &CudaStream) -> Result<()> {
        stream.inner().synchronize().map_err(|e| {
            CudaError::Driver {
                call: "cuStreamSynchronize",
                msg: e.to_string(),
            }
            .into()
        })
    }
}
