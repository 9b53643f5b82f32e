//! Stream identity and foreign-stream interop.
//!
//! A launch only needs to know *which* native stream to enqueue on, so every
//! stream-like type exposes the same narrow capability: [`StreamIdentity`].
//! Streams created by a backend implement it directly; streams owned by an
//! external framework are borrowed through [`ForeignStream`], a non-owning
//! view that can never synchronize or destroy what it wraps.

use std::fmt;
use std::marker::PhantomData;

/// `(context_id, native_id)` pair identifying a native stream.
///
/// `native_id` is the raw stream handle as an integer; `0` is the legacy
/// default stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamHandle {
    /// Owning execution context.
    pub context_id: u64,
    /// Raw native stream handle.
    pub native_id: u64,
}

impl StreamHandle {
    /// Creates a handle.
    #[must_use]
    pub const fn new(context_id: u64, native_id: u64) -> Self {
        Self {
            context_id,
            native_id,
        }
    }

    /// True for the legacy default stream.
    #[must_use]
    pub fn is_default_stream(&self) -> bool {
        self.native_id == 0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}:{:#x}", self.context_id, self.native_id)
    }
}

/// Capability: exposes native stream identity.
pub trait StreamIdentity {
    /// Returns the `(context_id, native_id)` pair of this stream.
    fn stream_handle(&self) -> StreamHandle;
}

impl StreamIdentity for StreamHandle {
    fn stream_handle(&self) -> StreamHandle {
        *self
    }
}

impl<T: StreamIdentity + ?Sized> StreamIdentity for &T {
    fn stream_handle(&self) -> StreamHandle {
        (**self).stream_handle()
    }
}

/// Implemented by stream objects of external frameworks that can report
/// their raw handle and owning context.
pub trait NativeStreamSource {
    /// Raw stream handle as an integer.
    fn native_stream_id(&self) -> u64;

    /// Owning context identifier.
    fn context_id(&self) -> u64;
}

/// Non-owning view of a stream owned by someone else.
///
/// The lifetime ties the view to the borrowed source, so it cannot outlive
/// it. The view has no `Drop`, no synchronize and no destroy: teardown stays
/// with the creator.
#[derive(Clone, Copy)]
pub struct ForeignStream<'a> {
    handle: StreamHandle,
    _source: PhantomData<&'a ()>,
}

impl<'a> ForeignStream<'a> {
    /// Borrows a framework stream.
    pub fn borrow<S: NativeStreamSource + ?Sized>(source: &'a S) -> Self {
        Self {
            handle: StreamHandle::new(source.context_id(), source.native_stream_id()),
            _source: PhantomData,
        }
    }

    /// Wraps a raw handle received over FFI.
    ///
    /// # Safety
    ///
    /// The caller guarantees `native_id` names a live stream in context
    /// `context_id` for as long as the returned view (and any launch issued
    /// through it) is in use.
    #[must_use]
    pub unsafe fn from_raw(context_id: u64, native_id: u64) -> ForeignStream<'static> {
        ForeignStream {
            handle: StreamHandle::new(context_id, native_id),
            _source: PhantomData,
        }
    }
}

impl StreamIdentity for ForeignStream<'_> {
    fn stream_handle(&self) -> StreamHandle {
        self.handle
    }
}

impl fmt::Debug for ForeignStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ForeignStream").field(&self.handle).finish()
    }
}
