//! Block ledger: free/used extent tracking for one arena
//!
//! The ledger partitions its arena's full byte range into address-ordered
//! extents, each `Free` or `Used`, with no gaps. Two invariants hold at all
//! times: the union of extents exactly equals the arena range, and no two
//! adjacent extents are both `Free` (adjacent frees coalesce eagerly on
//! every release). A violation of either means the metadata is corrupt and
//! the ledger panics rather than serving further requests from broken state.

use std::collections::BTreeMap;

use crate::error::{PoolError, PoolResult};

/// Extent state within the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentState {
    Free,
    Used,
}

/// A contiguous byte range within one arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Absolute base address
    pub base: usize,
    /// Size in bytes
    pub size: usize,
    pub state: ExtentState,
}

impl Extent {
    fn end(&self) -> usize {
        self.base + self.size
    }
}

/// Free/used extent tracking for one arena
///
/// Allocation is first-fit in ascending address order: bounded scan latency,
/// and low addresses get reused preferentially, which keeps coalescing
/// predictable. Release looks the used extent up by its base address in
/// O(log n); a miss is the double-free / invalid-free detector.
#[derive(Debug)]
pub struct BlockLedger {
    range_base: usize,
    range_size: usize,
    /// Extents keyed by base address; always partitions the full range
    extents: BTreeMap<usize, Extent>,
    /// Bytes currently marked `Used`
    in_use: usize,
}

impl BlockLedger {
    /// Default alignment for device access (256 bytes)
    pub const DEFAULT_ALIGNMENT: usize = 256;

    /// Create a ledger covering `[range_base, range_base + range_size)`
    pub fn new(range_base: usize, range_size: usize) -> Self {
        assert!(range_size > 0, "ledger range cannot be empty");
        let mut extents = BTreeMap::new();
        extents.insert(
            range_base,
            Extent {
                base: range_base,
                size: range_size,
                state: ExtentState::Free,
            },
        );
        BlockLedger {
            range_base,
            range_size,
            extents,
            in_use: 0,
        }
    }

    /// Reserve `size` bytes aligned to `alignment`
    ///
    /// Scans free extents in ascending address order and takes the first one
    /// whose aligned sub-range fits. The chosen extent splits into an
    /// optional leading free remainder (the alignment padding), a used
    /// extent of exactly `size` bytes, and an optional trailing free
    /// remainder. Returns `None` when no extent is large enough once
    /// alignment padding is accounted for.
    pub fn reserve(&mut self, size: usize, alignment: usize) -> Option<usize> {
        debug_assert!(size > 0);
        debug_assert!(alignment.is_power_of_two());

        let candidate = self.extents.values().find_map(|extent| {
            if extent.state != ExtentState::Free {
                return None;
            }
            let aligned = align_up(extent.base, alignment);
            if aligned >= extent.end() || extent.end() - aligned < size {
                return None;
            }
            Some((*extent, aligned))
        });

        let (extent, aligned) = candidate?;
        self.extents.remove(&extent.base);

        let padding = aligned - extent.base;
        if padding > 0 {
            self.extents.insert(
                extent.base,
                Extent {
                    base: extent.base,
                    size: padding,
                    state: ExtentState::Free,
                },
            );
        }

        self.extents.insert(
            aligned,
            Extent {
                base: aligned,
                size,
                state: ExtentState::Used,
            },
        );

        let trailing = extent.end() - (aligned + size);
        if trailing > 0 {
            self.extents.insert(
                aligned + size,
                Extent {
                    base: aligned + size,
                    size: trailing,
                    state: ExtentState::Free,
                },
            );
        }

        self.in_use += size;
        tracing::trace!(
            "ledger reserved {} bytes at {:#x} (alignment={})",
            size,
            aligned,
            alignment
        );
        Some(aligned)
    }

    /// Release the used extent starting at `base`
    ///
    /// Coalesces with the immediately preceding and following extents when
    /// either is also free. Returns the freed byte count, or
    /// `UnknownPointer` if no used extent starts at `base` - the canonical
    /// double-free detector.
    pub fn release(&mut self, base: usize) -> PoolResult<usize> {
        let extent = match self.extents.get(&base) {
            Some(e) if e.state == ExtentState::Used => *e,
            _ => return Err(PoolError::UnknownPointer(base)),
        };
        self.extents.remove(&base);
        self.in_use -= extent.size;

        let mut merged_base = base;
        let mut merged_size = extent.size;

        if let Some(next) = self.extents.get(&extent.end()).copied() {
            if next.state == ExtentState::Free {
                self.extents.remove(&next.base);
                merged_size += next.size;
            }
        }

        if let Some((&prev_base, &prev)) = self.extents.range(..base).next_back() {
            if prev.state == ExtentState::Free {
                if prev.end() != base {
                    panic!(
                        "ledger corrupted: gap between extents at {:#x} and {:#x}",
                        prev_base, base
                    );
                }
                self.extents.remove(&prev_base);
                merged_base = prev_base;
                merged_size += prev.size;
            }
        }

        self.extents.insert(
            merged_base,
            Extent {
                base: merged_base,
                size: merged_size,
                state: ExtentState::Free,
            },
        );

        tracing::trace!("ledger released {} bytes at {:#x}", extent.size, base);
        Ok(extent.size)
    }

    /// Sum of all free extents
    pub fn available_bytes(&self) -> usize {
        self.range_size - self.in_use
    }

    /// Bytes currently allocated
    pub fn in_use_bytes(&self) -> usize {
        self.in_use
    }

    /// Count and total bytes of live allocations
    pub fn used_extents(&self) -> (usize, usize) {
        let count = self
            .extents
            .values()
            .filter(|e| e.state == ExtentState::Used)
            .count();
        (count, self.in_use)
    }

    /// Number of free fragments
    pub fn fragment_count(&self) -> usize {
        self.extents
            .values()
            .filter(|e| e.state == ExtentState::Free)
            .count()
    }

    /// Fragmentation ratio (0.0 = single free block, higher = more scattered)
    pub fn fragmentation(&self) -> f32 {
        let free = self.available_bytes();
        if free == 0 {
            return 0.0;
        }
        let largest = self
            .extents
            .values()
            .filter(|e| e.state == ExtentState::Free)
            .map(|e| e.size)
            .max()
            .unwrap_or(0);
        1.0 - (largest as f32 / free as f32)
    }

    pub fn range_base(&self) -> usize {
        self.range_base
    }

    pub fn range_size(&self) -> usize {
        self.range_size
    }

    /// Verify partition and coalescing invariants; panics on corruption
    #[cfg(test)]
    fn check_invariants(&self) {
        let mut cursor = self.range_base;
        let mut prev_free = false;
        for extent in self.extents.values() {
            assert_eq!(extent.base, cursor, "gap or overlap in extent chain");
            assert!(extent.size > 0, "zero-size extent");
            let free = extent.state == ExtentState::Free;
            assert!(!(free && prev_free), "adjacent free extents not coalesced");
            prev_free = free;
            cursor = extent.end();
        }
        assert_eq!(cursor, self.range_base + self.range_size);
    }
}

/// Round `offset` up to the next multiple of `alignment` (a power of two)
pub fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}
