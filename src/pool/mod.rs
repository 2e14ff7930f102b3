//! Pool-allocation engine
//!
//! Reserves large device memory regions up front and serves fine-grained
//! allocation requests out of them. Calls to the native device allocator
//! are expensive and impose implicit cross-queue synchronization; the pool
//! amortizes them down to region reservation and growth.
//!
//! Layering, leaves first: a [`ledger::BlockLedger`] tracks free/used
//! extents with eager coalescing inside one [`arena::StreamArena`]; a
//! [`device_pool::DevicePool`] owns a device's reservations and arenas and
//! decides growth; the [`manager::PoolManager`] maps devices to pools and
//! exposes the initialize / allocate / free / finalize lifecycle.

pub mod arena;
pub mod config;
pub mod device_pool;
pub mod ledger;
pub mod manager;

pub use arena::StreamArena;
pub use config::{DeviceConfig, PoolFlags, QueueConfig, DEFAULT_GROWTH_INCREMENT};
pub use device_pool::{DevicePool, DevicePoolStats};
pub use ledger::{BlockLedger, Extent, ExtentState};
pub use manager::PoolManager;
