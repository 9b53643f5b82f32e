//! Streams created by the CUDA backend.

use std::sync::Arc;

use jitlaunch_core::{DeviceId, StreamHandle, StreamIdentity};

/// A stream created on one device. Destroyed when the last clone drops.
#[derive(Clone)]
pub struct CudaStream {
    device: DeviceId,
    inner: Arc<cudarc::driver::CudaStream>,
}

impl CudaStream {
    pub(crate) fn new(device: DeviceId, inner: Arc<cudarc::driver::CudaStream>) -> Self {
        Self { device, inner }
    }

    /// Device the stream belongs to.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Underlying cudarc stream.
    #[must_use]
    pub fn inner(&self) -> &Arc<cudarc::driver::CudaStream> {
        &self.inner
    }
}

impl std::fmt::Debug for CudaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CudaStream").field(&self.stream_handle()).finish()
    }
}

impl StreamIdentity for CudaStream {
    fn stream_handle(&self) -> StreamHandle {
        StreamHandle::new(
            u64::from(self.device.ordinal()),
            self.inner.cu_stream() as usize as u64,
        )
    }
}
