//! Device pool: reservations, arena routing, and growth for one device
//!
//! The pool owns every byte it has reserved. At initialize it carves one
//! stream arena per configured queue out of the initial reservation and
//! leaves the rest as the default arena. When no arena can satisfy a
//! request and growth is permitted, it reserves an additional region and
//! binds it to the default arena as a new section.

use std::collections::HashMap;

use crate::backend::{DeviceAllocator, DevicePtr, QueueHandle, Reservation};
use crate::error::{DeviceLeak, PoolError, PoolResult};
use crate::pool::arena::StreamArena;
use crate::pool::config::{DeviceConfig, PoolFlags};

/// Reserved/used accounting snapshot for one device pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePoolStats {
    pub device_id: i32,
    /// Bytes reserved from the underlying allocator
    pub reserved_bytes: usize,
    /// Bytes handed out to live allocations
    pub in_use_bytes: usize,
    /// Bytes free across every arena
    pub available_bytes: usize,
    /// Number of stream arenas plus default arena sections
    pub arena_count: usize,
}

/// Owns a device's memory reservations and routes requests to its arenas
#[derive(Debug)]
pub struct DevicePool {
    device_id: i32,
    /// In acquisition order; released in reverse at finalize
    reservations: Vec<Reservation>,
    stream_arenas: HashMap<QueueHandle, StreamArena>,
    /// Default (queue-agnostic) arena sections; growth appends here
    default_arenas: Vec<StreamArena>,
    growth_allowed: bool,
    growth_increment: usize,
}

impl DevicePool {
    /// Reserve device memory per `config` and carve the arenas
    ///
    /// Explicitly-sized queues get exactly their configured bytes. Queues
    /// without a size split the remainder evenly with the default arena
    /// (each takes a 1/(n+1) share); the default arena covers whatever is
    /// left after all queue carves.
    pub fn new(
        config: &DeviceConfig,
        flags: PoolFlags,
        allocator: &dyn DeviceAllocator,
    ) -> PoolResult<Self> {
        config.validate()?;

        let total = if config.total_bytes == 0 {
            let info = allocator.memory_info(config.device_id)?;
            info.free / 2
        } else {
            config.total_bytes
        };
        if total == 0 {
            return Err(PoolError::OutOfMemory(format!(
                "device {}: no memory available to reserve",
                config.device_id
            )));
        }

        let explicit: usize = config
            .queues
            .iter()
            .filter_map(|qc| qc.reserve_bytes)
            .sum();
        if explicit > total {
            return Err(PoolError::InvalidArgument(format!(
                "device {}: per-queue reservations ({} bytes) exceed reservation total ({} bytes)",
                config.device_id, explicit, total
            )));
        }

        let reservation = allocator.reserve(config.device_id, total)?;
        tracing::info!(
            device_id = config.device_id,
            bytes = total,
            queues = config.queues.len(),
            "device pool reserved initial region"
        );

        let unsized_count = config
            .queues
            .iter()
            .filter(|qc| qc.reserve_bytes.is_none())
            .count();
        let share = (total - explicit) / (unsized_count + 1);
        if unsized_count > 0 && share == 0 {
            allocator.release(&reservation)?;
            return Err(PoolError::InvalidArgument(format!(
                "device {}: reservation too small to carve {} queue arena(s)",
                config.device_id, unsized_count
            )));
        }

        let mut stream_arenas = HashMap::new();
        let mut cursor = reservation.base;
        for qc in &config.queues {
            let bytes = qc.reserve_bytes.unwrap_or(share);
            let arena = StreamArena::new(Some(qc.queue), cursor, bytes);
            tracing::debug!(
                "device {}: carved {} byte stream arena at {:#x} for queue {}",
                config.device_id,
                bytes,
                cursor,
                qc.queue.raw()
            );
            stream_arenas.insert(qc.queue, arena);
            cursor += bytes;
        }

        let mut default_arenas = Vec::new();
        let default_bytes = reservation.base + reservation.size - cursor;
        if default_bytes > 0 {
            default_arenas.push(StreamArena::new(None, cursor, default_bytes));
        }

        Ok(DevicePool {
            device_id: config.device_id,
            reservations: vec![reservation],
            stream_arenas,
            default_arenas,
            growth_allowed: flags == PoolFlags::Default,
            growth_increment: config.growth_increment,
        })
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    /// Allocate `size` bytes at `alignment` for `queue`
    ///
    /// Order: the queue's dedicated arena, then default arena sections,
    /// then growth (one additional reservation, retried once). Growth
    /// failures from the underlying allocator surface as `OutOfMemory` so
    /// callers handle exhaustion uniformly.
    pub fn allocate(
        &mut self,
        size: usize,
        alignment: usize,
        queue: Option<QueueHandle>,
        allocator: &dyn DeviceAllocator,
    ) -> PoolResult<DevicePtr> {
        if let Some(q) = queue {
            if let Some(arena) = self.stream_arenas.get_mut(&q) {
                if let Some(ptr) = arena.allocate(size, alignment) {
                    return Ok(ptr);
                }
            }
        }

        for arena in &mut self.default_arenas {
            if let Some(ptr) = arena.allocate(size, alignment) {
                return Ok(ptr);
            }
        }

        if !self.growth_allowed {
            return Err(PoolError::OutOfMemory(format!(
                "device {}: {} bytes requested, growth disabled ({} bytes free, fragmented across {} arena(s))",
                self.device_id,
                size,
                self.available_bytes(),
                self.arena_count()
            )));
        }

        // Headroom for alignment on top of the reservation's own 256-byte
        // base alignment.
        let grow_bytes = std::cmp::max(
            size.saturating_add(alignment),
            self.growth_increment,
        );
        let reservation = match allocator.reserve(self.device_id, grow_bytes) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    device_id = self.device_id,
                    bytes = grow_bytes,
                    error = %e,
                    "pool growth failed"
                );
                return Err(PoolError::OutOfMemory(format!(
                    "device {}: growth by {} bytes failed: {}",
                    self.device_id, grow_bytes, e
                )));
            }
        };
        tracing::info!(
            device_id = self.device_id,
            bytes = reservation.size,
            sections = self.default_arenas.len() + 1,
            "device pool grew"
        );

        self.reservations.push(reservation);
        let mut section = StreamArena::new(None, reservation.base, reservation.size);
        let ptr = section.allocate(size, alignment);
        self.default_arenas.push(section);
        ptr.ok_or_else(|| {
            PoolError::OutOfMemory(format!(
                "device {}: {} bytes do not fit a fresh {}-byte section",
                self.device_id, size, reservation.size
            ))
        })
    }

    /// Free `ptr`, trying the arena bound to `queue` first
    ///
    /// Same-queue free is the fast path. A pointer allocated on a different
    /// queue is found by scanning every arena by range; ranges are disjoint
    /// so the owning ledger is unambiguous.
    pub fn free(&mut self, ptr: DevicePtr, queue: Option<QueueHandle>) -> PoolResult<usize> {
        if let Some(q) = queue {
            if let Some(arena) = self.stream_arenas.get_mut(&q) {
                if arena.owns(ptr) {
                    return arena.free(ptr);
                }
            }
        }

        for arena in self.stream_arenas.values_mut() {
            if arena.owns(ptr) {
                return arena.free(ptr);
            }
        }
        for arena in &mut self.default_arenas {
            if arena.owns(ptr) {
                return arena.free(ptr);
            }
        }
        Err(PoolError::UnknownPointer(ptr.addr()))
    }

    /// Whether any arena's range contains `ptr`
    pub fn owns(&self, ptr: DevicePtr) -> bool {
        self.stream_arenas.values().any(|a| a.owns(ptr))
            || self.default_arenas.iter().any(|a| a.owns(ptr))
    }

    /// Release every reservation back to the underlying allocator
    ///
    /// Live allocations are reported, never reclaimed silently: the caller
    /// gets a `DeviceLeak` describing what was outstanding, but teardown
    /// still proceeds so the process can re-initialize cleanly.
    /// Reservations are released in reverse acquisition order.
    pub fn finalize(mut self, allocator: &dyn DeviceAllocator) -> PoolResult<Option<DeviceLeak>> {
        let mut leaked_allocations = 0;
        let mut leaked_bytes = 0;
        for arena in self
            .stream_arenas
            .values()
            .chain(self.default_arenas.iter())
        {
            let (count, bytes) = arena.used_extents();
            leaked_allocations += count;
            leaked_bytes += bytes;
        }

        let leak = if leaked_allocations > 0 {
            tracing::warn!(
                device_id = self.device_id,
                allocations = leaked_allocations,
                bytes = leaked_bytes,
                "finalizing device pool with live allocations"
            );
            Some(DeviceLeak {
                device_id: self.device_id,
                allocations: leaked_allocations,
                bytes: leaked_bytes,
            })
        } else {
            None
        };

        self.stream_arenas.clear();
        self.default_arenas.clear();

        let mut first_error = None;
        while let Some(reservation) = self.reservations.pop() {
            if let Err(e) = allocator.release(&reservation) {
                tracing::error!(
                    "device {}: failed to release reservation at {:#x}: {}",
                    self.device_id,
                    reservation.base,
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(leak)
    }

    pub fn available_bytes(&self) -> usize {
        self.stream_arenas
            .values()
            .chain(self.default_arenas.iter())
            .map(|a| a.available_bytes())
            .sum()
    }

    pub fn in_use_bytes(&self) -> usize {
        self.stream_arenas
            .values()
            .chain(self.default_arenas.iter())
            .map(|a| a.in_use_bytes())
            .sum()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reservations.iter().map(|r| r.size).sum()
    }

    fn arena_count(&self) -> usize {
        self.stream_arenas.len() + self.default_arenas.len()
    }

    pub fn stats(&self) -> DevicePoolStats {
        DevicePoolStats {
            device_id: self.device_id,
            reserved_bytes: self.reserved_bytes(),
            in_use_bytes: self.in_use_bytes(),
            available_bytes: self.available_bytes(),
            arena_count: self.arena_count(),
        }
    }
}
