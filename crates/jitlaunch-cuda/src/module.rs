//! Binary modules loaded through the driver API.
//!
//! Modules are loaded with `cuModuleLoadData` rather than through cudarc's
//! PTX helpers so that cubin images are accepted as-is. A kernel handle keeps
//! its module alive; the module is unloaded when the last handle drops.

use std::ffi::CString;
use std::ptr;
use std::sync::Arc;

use cudarc::driver::sys as cuda_sys;
use cudarc::driver::CudaContext;

use jitlaunch_core::{DeviceId, JitError, KernelFunction, LoadedModule, Result};

use crate::error::CudaError;

/// Owns a raw `CUmodule`.
struct ModuleHandle {
    ctx: Arc<CudaContext>,
    raw: cuda_sys::CUmodule,
}

// SAFETY: a CUmodule may be used from any thread once its context is bound.
unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        if self.raw.is_null() {
            return;
        }
        if self.ctx.bind_to_thread().is_err() {
            tracing::warn!("Leaking CUDA module: context could not be bound");
            return;
        }
        // SAFETY: `raw` was returned by cuModuleLoadData and is unloaded once.
        unsafe {
            let _ = cuda_sys::cuModuleUnload(self.raw);
        }
    }
}

/// A binary loaded on one device.
#[derive(Clone)]
pub struct CudaModule {
    device: DeviceId,
    inner: Arc<ModuleHandle>,
}

impl CudaModule {
    /// Loads a cubin (or PTX) image into `ctx`.
    ///
    /// The context must be bound to the calling thread.
    pub(crate) fn load(device: DeviceId, ctx: Arc<CudaContext>, image: &[u8]) -> Result<Self> {
        // The driver reads PTX images up to a NUL byte.
        let mut data = image.to_vec();
        if data.last() != Some(&0) {
            data.push(0);
        }

        let mut raw: cuda_sys::CUmodule = ptr::null_mut();
        // SAFETY: `data` outlives the call and `raw` is a valid out-pointer.
        let result = unsafe { cuda_sys::cuModuleLoadData(&mut raw, data.as_ptr() as *const _) };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(CudaError::Driver {
                call: "cuModuleLoadData",
                msg: format!("{:?}", result),
            }
            .into());
        }

        tracing::debug!(device = %device, bytes = image.len(), "Loaded CUDA module");
        Ok(Self {
            device,
            inner: Arc::new(ModuleHandle { ctx, raw }),
        })
    }
}

impl std::fmt::Debug for CudaModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaModule")
            .field("device", &self.device)
            .field("raw", &self.inner.raw)
            .finish()
    }
}

impl LoadedModule for CudaModule {
    type Kernel = CudaKernel;

    fn device(&self) -> DeviceId {
        self.device
    }

    fn kernel(&self, name: &str) -> Result<Option<CudaKernel>> {
        let c_name = CString::new(name)
            .map_err(|_| JitError::Backend(format!("kernel name contains NUL: {:?}", name)))?;

        self.inner.ctx.bind_to_thread().map_err(|e| CudaError::Driver {
            call: "cuCtxSetCurrent",
            msg: e.to_string(),
        })?;

        let mut func: cuda_sys::CUfunction = ptr::null_mut();
        // SAFETY: the module is alive for the duration of the call.
        let result =
            unsafe { cuda_sys::cuModuleGetFunction(&mut func, self.inner.raw, c_name.as_ptr()) };
        match result {
            cuda_sys::CUresult::CUDA_SUCCESS => Ok(Some(CudaKernel {
                name: name.to_string(),
                func,
                device: self.device,
                module: Arc::clone(&self.inner),
            })),
            cuda_sys::CUresult::CUDA_ERROR_NOT_FOUND => Ok(None),
            other => Err(CudaError::Driver {
                call: "cuModuleGetFunction",
                msg: format!("{:?}", other),
            }
            .into()),
        }
    }
}

/// A kernel entry point. Keeps its module loaded.
pub struct CudaKernel {
    name: String,
    func: cuda_sys::CUfunction,
    device: DeviceId,
    module: Arc<ModuleHandle>,
}

// SAFETY: a CUfunction is an immutable handle owned by its module, which the
// kernel keeps alive.
unsafe impl Send for CudaKernel {}
unsafe impl Sync for CudaKernel {}

impl CudaKernel {
    /// Device the kernel's module is loaded on.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Raw function handle.
    #[must_use]
    pub fn raw_function(&self) -> cuda_sys::CUfunction {
        self.func
    }

    pub(crate) fn context(&self) -> &Arc<CudaContext> {
        &self.module.ctx
    }
}

impl std::fmt::Debug for CudaKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaKernel")
            .field("name", &self.name)
            .field("device", &self.device)
            .finish()
    }
}

impl KernelFunction for CudaKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_registers(&self) -> Result<u32> {
        use cuda_sys::CUfunction_attribute_enum;
        use cudarc::driver::result::function::get_function_attribute;

        // SAFETY: `func` stays valid while `module` is held.
        let regs = unsafe {
            get_function_attribute(self.func, CUfunction_attribute_enum::CU_FUNC_ATTRIBUTE_NUM_REGS)
        }
        .map_err(|e| CudaError::Driver {
            call: "cuFuncGetAttribute",
            msg: format!("{:?}", e),
        })?;
        Ok(regs.max(0) as u32)
    }
}
