//! Queue isolation and coalescing behavior
//!
//! Allocations against distinct configured queues must come from disjoint
//! address ranges, and adjacent frees must merge back into extents large
//! enough to serve the combined size.

use std::sync::Arc;

use streampool::{
    DeviceConfig, PoolError, PoolFlags, PoolManager, QueueHandle, SystemAllocator,
};

fn manager_with(config: DeviceConfig, flags: PoolFlags) -> PoolManager {
    let manager = PoolManager::new(Arc::new(SystemAllocator::with_capacity(8 << 20)));
    manager.initialize(&[config], flags).unwrap();
    manager
}

#[test]
fn test_queue_allocations_disjoint() {
    let q1 = QueueHandle::from_raw(1);
    let q2 = QueueHandle::from_raw(2);
    let manager = manager_with(
        DeviceConfig::new(0, 256 * 1024).with_queue(q1).with_queue(q2),
        PoolFlags::Default,
    );

    let mut ranges = Vec::new();
    for _ in 0..4 {
        let a = manager.allocate(4096, Some(q1)).unwrap();
        let b = manager.allocate(4096, Some(q2)).unwrap();
        ranges.push((a, q1));
        ranges.push((b, q2));
    }
    for (i, &(p, _)) in ranges.iter().enumerate() {
        for &(other, _) in &ranges[i + 1..] {
            let p_end = p.addr() + 4096;
            let o_end = other.addr() + 4096;
            assert!(p_end <= other.addr() || o_end <= p.addr());
        }
    }
    for (ptr, q) in ranges {
        manager.free(ptr, Some(q)).unwrap();
    }
    manager.finalize().unwrap();
}

#[test]
fn test_write_through_one_queue_does_not_corrupt_other() {
    let q1 = QueueHandle::from_raw(1);
    let q2 = QueueHandle::from_raw(2);
    let manager = manager_with(
        DeviceConfig::new(0, 64 * 1024).with_queue(q1).with_queue(q2),
        PoolFlags::Default,
    );

    let a = manager.allocate(1024, Some(q1)).unwrap();
    let b = manager.allocate(1024, Some(q2)).unwrap();

    // SAFETY: host-backed pointers, both 1024 bytes long.
    unsafe {
        std::slice::from_raw_parts_mut(b.as_ptr() as *mut u8, 1024).fill(0x5A);
        std::slice::from_raw_parts_mut(a.as_ptr() as *mut u8, 1024).fill(0xA5);
        let read_b = std::slice::from_raw_parts(b.as_ptr() as *const u8, 1024);
        assert!(read_b.iter().all(|&v| v == 0x5A));
    }

    manager.free(a, Some(q1)).unwrap();
    manager.free(b, Some(q2)).unwrap();
    manager.finalize().unwrap();
}

#[test]
fn test_adjacent_frees_coalesce() {
    // Arena of 48k: A and B fill the first 32k, the tail holds 16k. A
    // 32k request can only succeed if freeing A and B merges them.
    let manager = manager_with(DeviceConfig::new(0, 48 * 1024), PoolFlags::CannotGrow);

    let a = manager.allocate(16 * 1024, None).unwrap();
    let b = manager.allocate(16 * 1024, None).unwrap();
    assert_eq!(b.addr(), a.addr() + 16 * 1024);
    assert!(matches!(
        manager.allocate(32 * 1024, None),
        Err(PoolError::OutOfMemory(_))
    ));

    manager.free(a, None).unwrap();
    manager.free(b, None).unwrap();
    let merged = manager.allocate(32 * 1024, None).unwrap();
    assert_eq!(merged.addr(), a.addr());

    manager.free(merged, None).unwrap();
    manager.finalize().unwrap();
}

#[test]
fn test_queue_overflow_spills_to_default_not_peer() {
    let q1 = QueueHandle::from_raw(1);
    let q2 = QueueHandle::from_raw(2);
    let manager = manager_with(
        DeviceConfig::new(0, 96 * 1024)
            .with_sized_queue(q1, 16 * 1024)
            .with_sized_queue(q2, 16 * 1024),
        PoolFlags::CannotGrow,
    );

    // First allocation in q2's arena lands at its base, pinning the
    // arena's position.
    let pinned = manager.allocate(8 * 1024, Some(q2)).unwrap();
    let q2_base = pinned.addr();
    // Larger than q1's whole arena: must spill to the default arena,
    // never into q2's range.
    let spilled = manager.allocate(32 * 1024, Some(q1)).unwrap();
    assert!(
        spilled.addr() >= q2_base + 16 * 1024 || spilled.addr() + 32 * 1024 <= q2_base - 16 * 1024
    );

    manager.free(pinned, Some(q2)).unwrap();
    manager.free(spilled, Some(q1)).unwrap();
    manager.finalize().unwrap();
}

#[test]
fn test_cross_queue_free_supported_as_fallback() {
    let q1 = QueueHandle::from_raw(1);
    let q2 = QueueHandle::from_raw(2);
    let manager = manager_with(
        DeviceConfig::new(0, 64 * 1024).with_queue(q1).with_queue(q2),
        PoolFlags::Default,
    );

    let ptr = manager.allocate(2048, Some(q1)).unwrap();
    manager.free(ptr, Some(q2)).unwrap();
    // The extent went back to q1's ledger: its arena serves the same
    // address again.
    let again = manager.allocate(2048, Some(q1)).unwrap();
    assert_eq!(again.addr(), ptr.addr());
    manager.free(again, Some(q1)).unwrap();
    manager.finalize().unwrap();
}
