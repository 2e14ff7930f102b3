//! Device memory backends
//!
//! The pool never talks to a device runtime directly; it goes through the
//! [`DeviceAllocator`] trait, which covers exactly the collaborator surface
//! it needs: reserving and releasing large contiguous regions, and querying
//! free/total memory for the default-sizing heuristic. Queue handles are
//! opaque identities here - the pool compares them, it never synchronizes
//! on them.

#[cfg(feature = "rocm")]
pub mod hip;
pub mod system;

#[cfg(feature = "rocm")]
pub use hip::HipAllocator;
pub use system::SystemAllocator;

use crate::error::PoolResult;

/// Opaque identity of one hardware execution queue (HIP stream)
///
/// The pool only ever asks "is this the same queue?" - two handles are equal
/// exactly when they wrap the same raw stream value. Constructed from the
/// raw stream pointer on the HIP side, or from any unique integer in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(u64);

impl QueueHandle {
    /// Wrap a raw queue identity (e.g. a `hipStream_t` pointer value)
    pub fn from_raw(raw: u64) -> Self {
        QueueHandle(raw)
    }

    /// The raw identity this handle wraps
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Pointer into pooled device memory
///
/// Stored as an address rather than a raw pointer so the bookkeeping types
/// stay `Send + Sync` without unsafe impls; `as_ptr()` recovers the raw
/// pointer for FFI calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(usize);

impl DevicePtr {
    pub fn from_addr(addr: usize) -> Self {
        DevicePtr(addr)
    }

    pub fn addr(&self) -> usize {
        self.0
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

/// One large contiguous region obtained from the underlying allocator
///
/// Reservations are owned by exactly one device pool and released back to
/// the allocator that produced them, in reverse acquisition order, at
/// finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub device_id: i32,
    /// Base address of the region
    pub base: usize,
    /// Region size in bytes
    pub size: usize,
}

/// Free/total device memory snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free: usize,
    pub total: usize,
}

/// Underlying device memory allocator
///
/// Implementations reserve large contiguous regions the pool subdivides.
/// Base addresses must be aligned to at least [`RESERVATION_ALIGNMENT`]
/// (both `hipMalloc` and the host implementation guarantee this).
pub trait DeviceAllocator: Send + Sync {
    /// Reserve a contiguous region of `bytes` on `device_id`
    fn reserve(&self, device_id: i32, bytes: usize) -> PoolResult<Reservation>;

    /// Release a region previously obtained from `reserve`
    fn release(&self, reservation: &Reservation) -> PoolResult<()>;

    /// Query free and total memory for `device_id`
    fn memory_info(&self, device_id: i32) -> PoolResult<MemoryInfo>;
}

/// Minimum alignment of reservation base addresses
pub const RESERVATION_ALIGNMENT: usize = 256;
