//! Per-ordinal CUDA context registry.

use std::collections::HashMap;
use std::sync::Arc;

use cudarc::driver::CudaContext;
use parking_lot::Mutex;

use jitlaunch_core::{Architecture, DeviceId, Result};

use crate::error::CudaError;

/// Lazily created primary contexts, one per device ordinal.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: Mutex<HashMap<usize, Arc<CudaContext>>>,
}

impl ContextRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for `device`, created on first use.
    pub fn get(&self, device: DeviceId) -> Result<Arc<CudaContext>> {
        let ordinal = device.index();
        let mut contexts = self.contexts.lock();
        if let Some(ctx) = contexts.get(&ordinal) {
            return Ok(Arc::clone(ctx));
        }

        let ctx = CudaContext::new(ordinal).map_err(|e| CudaError::DeviceInit {
            ordinal,
            msg: e.to_string(),
        })?;
        tracing::debug!(ordinal, "Created CUDA context");
        contexts.insert(ordinal, Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Context for `device`, bound to the calling thread.
    pub fn bind(&self, device: DeviceId) -> Result<Arc<CudaContext>> {
        let ctx = self.get(device)?;
        ctx.bind_to_thread().map_err(|e| CudaError::Driver {
            call: "cuCtxSetCurrent",
            msg: e.to_string(),
        })?;
        Ok(ctx)
    }

    /// Architecture of `device` from its compute capability.
    pub fn architecture(&self, device: DeviceId) -> Result<Architecture> {
        let ctx = self.get(device)?;
        let (major, minor) = ctx.compute_capability().map_err(|e| CudaError::Driver {
            call: "cuDeviceGetAttribute",
            msg: e.to_string(),
        })?;
        Ok(Architecture::from_compute_capability(major as u32, minor as u32))
    }

    /// Device name.
    pub fn name(&self, device: DeviceId) -> Result<String> {
        let ctx = self.get(device)?;
        Ok(ctx.name().map_err(|e| CudaError::Driver {
            call: "cuDeviceGetName",
            msg: e.to_string(),
        })?)
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ordinals: Vec<usize> = self.contexts.lock().keys().copied().collect();
        ordinals.sort_unstable();
        f.debug_struct("ContextRegistry")
            .field("ordinals", &ordinals)
            .finish()
    }
}
