//! Stream arena: one contiguous device range bound to one queue
//!
//! An arena is a slice of a device pool's reservation with its own block
//! ledger. It never resizes itself; growth is a device-pool decision. The
//! arena also never waits on device work - pointer lifetime relative to
//! in-flight kernels is the caller's queue discipline, not the arena's.

use crate::backend::{DevicePtr, QueueHandle};
use crate::error::PoolResult;
use crate::pool::ledger::BlockLedger;

/// A memory region dedicated to allocations against one execution queue
///
/// `queue == None` marks a default arena: no queue affinity, it serves
/// unbound allocations and overflow from exhausted stream arenas.
#[derive(Debug)]
pub struct StreamArena {
    queue: Option<QueueHandle>,
    base: usize,
    size: usize,
    ledger: BlockLedger,
}

impl StreamArena {
    /// Create an arena over `[base, base + size)`
    pub fn new(queue: Option<QueueHandle>, base: usize, size: usize) -> Self {
        StreamArena {
            queue,
            base,
            size,
            ledger: BlockLedger::new(base, size),
        }
    }

    pub fn queue(&self) -> Option<QueueHandle> {
        self.queue
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `ptr` falls inside this arena's byte range
    ///
    /// Arena ranges never overlap within one device pool, so a positive
    /// answer identifies the owning arena uniquely.
    pub fn owns(&self, ptr: DevicePtr) -> bool {
        let addr = ptr.addr();
        addr >= self.base && addr < self.base + self.size
    }

    /// Try to allocate `size` bytes at `alignment`; `None` when full
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<DevicePtr> {
        self.ledger.reserve(size, alignment).map(DevicePtr::from_addr)
    }

    /// Free an allocation previously returned by `allocate`
    ///
    /// Returns the freed byte count; `UnknownPointer` if the address is not
    /// a live allocation in this arena.
    pub fn free(&mut self, ptr: DevicePtr) -> PoolResult<usize> {
        self.ledger.release(ptr.addr())
    }

    pub fn available_bytes(&self) -> usize {
        self.ledger.available_bytes()
    }

    pub fn in_use_bytes(&self) -> usize {
        self.ledger.in_use_bytes()
    }

    /// Count and byte total of live allocations
    pub fn used_extents(&self) -> (usize, usize) {
        self.ledger.used_extents()
    }

    pub fn fragment_count(&self) -> usize {
        self.ledger.fragment_count()
    }

    pub fn fragmentation(&self) -> f32 {
        self.ledger.fragmentation()
    }
}
