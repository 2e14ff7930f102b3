//! ROCm HIP allocator backend
//!
//! FFI declarations below are bound to the ROCm HIP API. Only the surface
//! the pool actually needs is declared: device selection, raw device-memory
//! allocation, and the free/total memory query. Status codes are raw `i32`
//! checked against `HIP_SUCCESS`.

use std::ffi::c_void;
use std::ptr;

use crate::backend::{DeviceAllocator, MemoryInfo, Reservation};
use crate::error::{PoolError, PoolResult};

#[link(name = "amdhip64")]
extern "C" {
    fn hipInit(flags: u32) -> i32;
    fn hipGetDeviceCount(count: *mut i32) -> i32;
    fn hipSetDevice(deviceId: i32) -> i32;
    fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    fn hipFree(ptr: *mut c_void) -> i32;
    fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
}

/// HIP success code
const HIP_SUCCESS: i32 = 0;

/// [`DeviceAllocator`] over the ROCm HIP runtime
///
/// Each call selects the target device with `hipSetDevice` before touching
/// memory; HIP device context is per-thread, so the selection cannot be
/// cached across calls arriving from different host threads.
#[derive(Debug)]
pub struct HipAllocator {
    device_count: i32,
}

impl HipAllocator {
    /// Initialize the HIP runtime and enumerate devices
    pub fn new() -> PoolResult<Self> {
        let result = unsafe { hipInit(0) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Internal(format!(
                "hipInit failed with code {}",
                result
            )));
        }

        let mut count: i32 = 0;
        let result = unsafe { hipGetDeviceCount(&mut count) };
        if result != HIP_SUCCESS || count <= 0 {
            return Err(PoolError::Internal(format!(
                "hipGetDeviceCount failed (code {}, count {})",
                result, count
            )));
        }

        tracing::info!(device_count = count, "HIP allocator initialized");
        Ok(HipAllocator {
            device_count: count,
        })
    }

    pub fn device_count(&self) -> i32 {
        self.device_count
    }

    fn set_device(&self, device_id: i32) -> PoolResult<()> {
        if device_id < 0 || device_id >= self.device_count {
            return Err(PoolError::InvalidArgument(format!(
                "device {} out of range (0..{})",
                device_id, self.device_count
            )));
        }
        let result = unsafe { hipSetDevice(device_id) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Internal(format!(
                "hipSetDevice({}) failed with code {}",
                device_id, result
            )));
        }
        Ok(())
    }
}

impl DeviceAllocator for HipAllocator {
    fn reserve(&self, device_id: i32, bytes: usize) -> PoolResult<Reservation> {
        if bytes == 0 {
            return Err(PoolError::InvalidArgument(
                "reservation size cannot be zero".to_string(),
            ));
        }
        self.set_device(device_id)?;

        let mut raw: *mut c_void = ptr::null_mut();
        let result = unsafe { hipMalloc(&mut raw, bytes) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Internal(format!(
                "hipMalloc failed with code {} for {} bytes on device {}",
                result, bytes, device_id
            )));
        }
        if raw.is_null() {
            return Err(PoolError::Internal(format!(
                "hipMalloc returned null pointer for {} bytes on device {}",
                bytes, device_id
            )));
        }

        tracing::debug!(device_id, bytes, ptr = ?raw, "hipMalloc reserved region");
        Ok(Reservation {
            device_id,
            base: raw as usize,
            size: bytes,
        })
    }

    fn release(&self, reservation: &Reservation) -> PoolResult<()> {
        self.set_device(reservation.device_id)?;
        let result = unsafe { hipFree(reservation.base as *mut c_void) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Internal(format!(
                "hipFree failed with code {} (ptr={:#x})",
                result, reservation.base
            )));
        }
        tracing::debug!(
            device_id = reservation.device_id,
            bytes = reservation.size,
            "hipFree released region"
        );
        Ok(())
    }

    fn memory_info(&self, device_id: i32) -> PoolResult<MemoryInfo> {
        self.set_device(device_id)?;
        let mut free: usize = 0;
        let mut total: usize = 0;
        let result = unsafe { hipMemGetInfo(&mut free, &mut total) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Internal(format!(
                "hipMemGetInfo failed with code {}",
                result
            )));
        }
        Ok(MemoryInfo { free, total })
    }
}
