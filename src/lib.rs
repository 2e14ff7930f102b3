//! streampool - stream-aware GPU memory pool
//!
//! A sub-allocator for GPU device memory. Large regions are reserved from
//! the native device allocator up front and subdivided to serve
//! high-frequency allocate/free traffic, with a dedicated arena per
//! execution queue so unrelated queues never serialize on each other's
//! allocations.
//!
//! The allocator runs entirely on the calling host threads and never waits
//! on device work: frees are metadata operations, and reuse ordering is the
//! caller's queue discipline. See [`pool::PoolManager`] for the lifecycle
//! entry point and [`backend::DeviceAllocator`] for the collaborator
//! boundary to the device runtime.

pub mod backend;
pub mod error;
pub mod logging;
pub mod pool;

pub use backend::{DeviceAllocator, DevicePtr, MemoryInfo, QueueHandle, Reservation};
#[cfg(feature = "rocm")]
pub use backend::HipAllocator;
pub use backend::SystemAllocator;
pub use error::{DeviceLeak, LeakReport, PoolError, PoolResult};
pub use pool::{
    BlockLedger, DeviceConfig, DevicePool, DevicePoolStats, PoolFlags, PoolManager, QueueConfig,
    StreamArena,
};
pub use logging::init_logging;
