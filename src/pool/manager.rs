//! Pool manager: process-wide entry point over all device pools
//!
//! The manager is an explicit context object rather than an ambient global:
//! callers construct one (injecting the underlying allocator) and drive the
//! initialize / allocate / free / finalize lifecycle through it, so tests
//! run any number of independent instances side by side.
//!
//! Locking is two-level: an outer `RwLock` guards the device map's
//! existence (write-held only by initialize/finalize), and each device pool
//! sits behind its own `Mutex`, so operations against different devices
//! never contend on the same lock. Growth holds the owning pool's lock for
//! the whole underlying reservation call - conservative, but no other
//! allocate or free can ever observe a partially-grown pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::backend::{DeviceAllocator, DevicePtr, QueueHandle, SystemAllocator};
use crate::error::{LeakReport, PoolError, PoolResult};
use crate::pool::config::{DeviceConfig, PoolFlags};
use crate::pool::device_pool::{DevicePool, DevicePoolStats};
use crate::pool::ledger::BlockLedger;

struct ManagerState {
    pools: HashMap<i32, Mutex<DevicePool>>,
    queue_device: HashMap<QueueHandle, i32>,
    /// Device serving allocations whose queue is unbound
    default_device: i32,
}

/// Top-level registry mapping device identifiers to device pools
pub struct PoolManager {
    allocator: Arc<dyn DeviceAllocator>,
    state: RwLock<Option<ManagerState>>,
}

impl PoolManager {
    /// Create a manager over the given underlying allocator
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        PoolManager {
            allocator,
            state: RwLock::new(None),
        }
    }

    /// Create a manager backed by host memory (tests, CPU fallback)
    pub fn with_system_allocator() -> Self {
        Self::new(Arc::new(SystemAllocator::new()))
    }

    /// Reserve device memory and build one pool per configuration
    ///
    /// Fails with `AlreadyInitialized` if called again without an
    /// intervening `finalize`. The first configuration's device becomes the
    /// default device for unbound queues. On any per-device failure, pools
    /// built so far are torn down before the error returns.
    pub fn initialize(&self, configs: &[DeviceConfig], flags: PoolFlags) -> PoolResult<()> {
        let mut state = self.state.write()?;
        if state.is_some() {
            return Err(PoolError::AlreadyInitialized);
        }
        if configs.is_empty() {
            return Err(PoolError::InvalidArgument(
                "at least one device configuration is required".to_string(),
            ));
        }

        let mut queue_device: HashMap<QueueHandle, i32> = HashMap::new();
        for config in configs {
            config.validate()?;
            for qc in &config.queues {
                if let Some(other) = queue_device.insert(qc.queue, config.device_id) {
                    return Err(PoolError::InvalidArgument(format!(
                        "queue {:?} bound to both device {} and device {}",
                        qc.queue, other, config.device_id
                    )));
                }
            }
        }

        let mut pools: HashMap<i32, Mutex<DevicePool>> = HashMap::new();
        for config in configs {
            if pools.contains_key(&config.device_id) {
                self.teardown(pools);
                return Err(PoolError::InvalidArgument(format!(
                    "device {} configured twice",
                    config.device_id
                )));
            }
            match DevicePool::new(config, flags, self.allocator.as_ref()) {
                Ok(pool) => {
                    pools.insert(config.device_id, Mutex::new(pool));
                }
                Err(e) => {
                    self.teardown(pools);
                    return Err(e);
                }
            }
        }

        tracing::info!(devices = pools.len(), ?flags, "pool manager initialized");
        *state = Some(ManagerState {
            pools,
            queue_device,
            default_device: configs[0].device_id,
        });
        Ok(())
    }

    /// Allocate `size` bytes with the default device-access alignment
    pub fn allocate(&self, size: usize, queue: Option<QueueHandle>) -> PoolResult<DevicePtr> {
        self.allocate_aligned(size, BlockLedger::DEFAULT_ALIGNMENT, queue)
    }

    /// Allocate `size` bytes aligned to at least `alignment`
    ///
    /// The effective alignment is never below the 256-byte device-access
    /// default; `alignment` only raises it for value types that demand
    /// more. Must be a power of two.
    pub fn allocate_aligned(
        &self,
        size: usize,
        alignment: usize,
        queue: Option<QueueHandle>,
    ) -> PoolResult<DevicePtr> {
        if size == 0 {
            return Err(PoolError::InvalidArgument(
                "allocation size cannot be zero".to_string(),
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidArgument(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }
        let alignment = alignment.max(BlockLedger::DEFAULT_ALIGNMENT);

        let state = self.state.read()?;
        let state = state.as_ref().ok_or(PoolError::NotInitialized)?;
        let device = self.resolve_device(state, queue);
        let pool = state
            .pools
            .get(&device)
            .ok_or_else(|| PoolError::Internal(format!("no pool for device {}", device)))?;
        let result = pool
            .lock()?
            .allocate(size, alignment, queue, self.allocator.as_ref());
        result
    }

    /// Free a pooled allocation
    ///
    /// The queue is a routing hint only: the extent goes back to the ledger
    /// that served it, found by recorded ownership. If the queue's device
    /// does not own the pointer, the remaining pools are scanned before
    /// reporting `UnknownPointer`.
    pub fn free(&self, ptr: DevicePtr, queue: Option<QueueHandle>) -> PoolResult<()> {
        let state = self.state.read()?;
        let state = state.as_ref().ok_or(PoolError::NotInitialized)?;
        let device = self.resolve_device(state, queue);

        if let Some(pool) = state.pools.get(&device) {
            let mut pool = pool.lock()?;
            if pool.owns(ptr) {
                return pool.free(ptr, queue).map(|_| ());
            }
        }

        for (&other, pool) in &state.pools {
            if other == device {
                continue;
            }
            let mut pool = pool.lock()?;
            if pool.owns(ptr) {
                return pool.free(ptr, queue).map(|_| ());
            }
        }
        Err(PoolError::UnknownPointer(ptr.addr()))
    }

    /// Finalize every device pool and return to the pre-initialize state
    ///
    /// Leaks do not stop teardown: every pool is finalized and every
    /// reservation released, with all leak reports aggregated into one
    /// `MemoryLeak` error. A subsequent `initialize` is valid either way.
    pub fn finalize(&self) -> PoolResult<()> {
        let mut state = self.state.write()?;
        let state = state.take().ok_or(PoolError::NotInitialized)?;

        let mut pools: Vec<_> = state.pools.into_iter().collect();
        pools.sort_by_key(|(device, _)| *device);

        let mut report = LeakReport::default();
        let mut first_error = None;
        for (_, pool) in pools {
            let pool = pool.into_inner()?;
            match pool.finalize(self.allocator.as_ref()) {
                Ok(Some(leak)) => report.devices.push(leak),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if !report.is_empty() {
            return Err(PoolError::MemoryLeak(report));
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        tracing::info!("pool manager finalized");
        Ok(())
    }

    /// Whether an initialize/finalize cycle is currently active
    pub fn is_initialized(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Per-device accounting snapshots, ordered by device id
    pub fn stats(&self) -> PoolResult<Vec<DevicePoolStats>> {
        let state = self.state.read()?;
        let state = state.as_ref().ok_or(PoolError::NotInitialized)?;
        let mut stats = Vec::with_capacity(state.pools.len());
        for pool in state.pools.values() {
            stats.push(pool.lock()?.stats());
        }
        stats.sort_by_key(|s| s.device_id);
        Ok(stats)
    }

    fn resolve_device(&self, state: &ManagerState, queue: Option<QueueHandle>) -> i32 {
        queue
            .and_then(|q| state.queue_device.get(&q).copied())
            .unwrap_or(state.default_device)
    }

    /// Best-effort teardown of pools built during a failed initialize
    fn teardown(&self, pools: HashMap<i32, Mutex<DevicePool>>) {
        for (_, pool) in pools {
            if let Ok(pool) = pool.into_inner() {
                if let Err(e) = pool.finalize(self.allocator.as_ref()) {
                    tracing::error!(error = %e, "teardown after failed initialize");
                }
            }
        }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let initialized = self.is_initialized();
        f.debug_struct("PoolManager")
            .field("initialized", &initialized)
            .finish()
    }
}
