//! Host-memory allocator backend
//!
//! Serves the [`DeviceAllocator`] contract out of ordinary host memory via
//! `std::alloc`. This is the backend used by the test suites (real, readable
//! memory lets tests do memcpy-and-read-back cycles) and works as a CPU
//! fallback when no GPU is present.

use std::alloc::{alloc, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::{DeviceAllocator, MemoryInfo, Reservation, RESERVATION_ALIGNMENT};
use crate::error::{PoolError, PoolResult};

/// Default simulated device capacity (256 MB)
const DEFAULT_CAPACITY: usize = 256 * 1024 * 1024;

/// Host-memory implementation of [`DeviceAllocator`]
///
/// Reports a fixed per-device capacity through `memory_info`, decremented by
/// outstanding reservations, so the default-sizing heuristic and the no-leak
/// accounting behave the same way they do against a real device.
#[derive(Debug)]
pub struct SystemAllocator {
    capacity: usize,
    reserved: AtomicUsize,
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator reporting `capacity` bytes of device memory
    pub fn with_capacity(capacity: usize) -> Self {
        SystemAllocator {
            capacity,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Bytes currently handed out as reservations
    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::SeqCst)
    }

    fn layout_for(bytes: usize) -> PoolResult<Layout> {
        Layout::from_size_align(bytes, RESERVATION_ALIGNMENT)
            .map_err(|e| PoolError::Internal(format!("bad reservation layout: {}", e)))
    }
}

impl DeviceAllocator for SystemAllocator {
    fn reserve(&self, device_id: i32, bytes: usize) -> PoolResult<Reservation> {
        if bytes == 0 {
            return Err(PoolError::InvalidArgument(
                "reservation size cannot be zero".to_string(),
            ));
        }
        let outstanding = self.reserved.load(Ordering::SeqCst);
        if outstanding + bytes > self.capacity {
            return Err(PoolError::OutOfMemory(format!(
                "host backend exhausted: {} requested, {} of {} free",
                bytes,
                self.capacity - outstanding,
                self.capacity
            )));
        }

        let layout = Self::layout_for(bytes)?;
        // SAFETY: layout has non-zero size and a valid power-of-two alignment.
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(PoolError::OutOfMemory(format!(
                "host allocation of {} bytes failed",
                bytes
            )));
        }

        self.reserved.fetch_add(bytes, Ordering::SeqCst);
        tracing::debug!(device_id, bytes, "system backend reserved region");
        Ok(Reservation {
            device_id,
            base: ptr as usize,
            size: bytes,
        })
    }

    fn release(&self, reservation: &Reservation) -> PoolResult<()> {
        let layout = Self::layout_for(reservation.size)?;
        // SAFETY: `base`/`size` came from our own `reserve` with this exact
        // layout, and the pool releases each reservation exactly once.
        unsafe { dealloc(reservation.base as *mut u8, layout) };
        self.reserved.fetch_sub(reservation.size, Ordering::SeqCst);
        tracing::debug!(
            device_id = reservation.device_id,
            bytes = reservation.size,
            "system backend released region"
        );
        Ok(())
    }

    fn memory_info(&self, _device_id: i32) -> PoolResult<MemoryInfo> {
        let outstanding = self.reserved.load(Ordering::SeqCst);
        Ok(MemoryInfo {
            free: self.capacity - outstanding,
            total: self.capacity,
        })
    }
}
