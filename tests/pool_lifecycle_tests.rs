//! End-to-end lifecycle tests for the pool manager
//!
//! Runs against the host-memory backend; every test constructs its own
//! manager instance, so suites run fully isolated and in parallel.

use std::sync::Arc;

use streampool::{
    DeviceAllocator, DeviceConfig, PoolError, PoolFlags, PoolManager, QueueHandle, SystemAllocator,
};

fn manager_with_capacity(capacity: usize) -> (PoolManager, Arc<SystemAllocator>) {
    let allocator = Arc::new(SystemAllocator::with_capacity(capacity));
    (PoolManager::new(allocator.clone()), allocator)
}

#[test]
fn test_no_leak_round_trip() -> anyhow::Result<()> {
    let allocator = Arc::new(SystemAllocator::with_capacity(4 << 20));
    let before = allocator.memory_info(0)?;

    let manager = PoolManager::new(allocator.clone());
    manager.initialize(&[DeviceConfig::new(0, 1 << 20)], PoolFlags::Default)?;

    let mut live = Vec::new();
    for i in 1..=32 {
        live.push(manager.allocate(i * 100, None)?);
    }
    // Free in an order that exercises both coalescing directions.
    for ptr in live.drain(..).rev() {
        manager.free(ptr, None)?;
    }
    manager.finalize()?;

    let after = allocator.memory_info(0)?;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn test_double_free_detected() {
    let (manager, _) = manager_with_capacity(1 << 20);
    manager
        .initialize(&[DeviceConfig::new(0, 64 * 1024)], PoolFlags::Default)
        .unwrap();

    let ptr = manager.allocate(4096, None).unwrap();
    manager.free(ptr, None).unwrap();
    assert!(matches!(
        manager.free(ptr, None),
        Err(PoolError::UnknownPointer(_))
    ));
    manager.finalize().unwrap();
}

#[test]
fn test_leak_blocks_finalize_but_allows_reinit() {
    let (manager, allocator) = manager_with_capacity(1 << 20);
    manager
        .initialize(&[DeviceConfig::new(0, 64 * 1024)], PoolFlags::Default)
        .unwrap();

    let _leaked = manager.allocate(8192, None).unwrap();
    match manager.finalize() {
        Err(PoolError::MemoryLeak(report)) => {
            assert_eq!(report.total_allocations(), 1);
            assert_eq!(report.total_bytes(), 8192);
            assert_eq!(report.devices[0].device_id, 0);
        }
        other => panic!("expected MemoryLeak, got {:?}", other),
    }

    // Teardown still happened: the backend got everything back and a fresh
    // cycle works.
    assert_eq!(allocator.reserved_bytes(), 0);
    manager
        .initialize(&[DeviceConfig::new(0, 16 * 1024)], PoolFlags::Default)
        .unwrap();
    let ptr = manager.allocate(1024, None).unwrap();
    manager.free(ptr, None).unwrap();
    manager.finalize().unwrap();
}

#[test]
fn test_cannot_grow_exhaustion() {
    let (manager, allocator) = manager_with_capacity(4 << 20);
    manager
        .initialize(&[DeviceConfig::new(0, 16 * 1024)], PoolFlags::CannotGrow)
        .unwrap();

    let held = manager.allocate(8 * 1024, None).unwrap();
    assert!(matches!(
        manager.allocate(16 * 1024, None),
        Err(PoolError::OutOfMemory(_))
    ));
    // Exhaustion must not have reserved anything extra.
    assert_eq!(allocator.reserved_bytes(), 16 * 1024);

    manager.free(held, None).unwrap();
    manager.finalize().unwrap();
}

#[test]
fn test_growth_satisfies_oversized_request() {
    let (manager, allocator) = manager_with_capacity(16 << 20);
    manager
        .initialize(
            &[DeviceConfig::new(0, 16 * 1024).with_growth_increment(64 * 1024)],
            PoolFlags::Default,
        )
        .unwrap();

    let big = manager.allocate(48 * 1024, None).unwrap();
    assert!(allocator.reserved_bytes() >= 16 * 1024 + 64 * 1024);

    manager.free(big, None).unwrap();
    manager.finalize().unwrap();
    assert_eq!(allocator.reserved_bytes(), 0);
}

#[test]
fn test_heuristic_reservation_size() {
    // total_bytes == 0 reserves half of what the backend reports free.
    let (manager, allocator) = manager_with_capacity(8 << 20);
    manager
        .initialize(&[DeviceConfig::new(0, 0)], PoolFlags::Default)
        .unwrap();
    assert_eq!(allocator.reserved_bytes(), 4 << 20);
    manager.finalize().unwrap();
}

#[test]
fn test_independent_managers_coexist() {
    let (a, _) = manager_with_capacity(1 << 20);
    let (b, _) = manager_with_capacity(1 << 20);
    a.initialize(&[DeviceConfig::new(0, 32 * 1024)], PoolFlags::Default)
        .unwrap();
    b.initialize(&[DeviceConfig::new(0, 32 * 1024)], PoolFlags::Default)
        .unwrap();

    let pa = a.allocate(1024, None).unwrap();
    let pb = b.allocate(1024, None).unwrap();
    // Each manager only knows its own allocations.
    assert!(matches!(
        a.free(pb, None),
        Err(PoolError::UnknownPointer(_))
    ));
    a.free(pa, None).unwrap();
    b.free(pb, None).unwrap();
    a.finalize().unwrap();
    b.finalize().unwrap();
}

#[test]
fn test_stats_track_usage() {
    let q = QueueHandle::from_raw(1);
    let (manager, _) = manager_with_capacity(1 << 20);
    manager
        .initialize(
            &[DeviceConfig::new(0, 64 * 1024).with_queue(q)],
            PoolFlags::Default,
        )
        .unwrap();

    let ptr = manager.allocate(4096, Some(q)).unwrap();
    let stats = manager.stats().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].reserved_bytes, 64 * 1024);
    assert_eq!(stats[0].in_use_bytes, 4096);
    assert_eq!(stats[0].available_bytes, 64 * 1024 - 4096);

    manager.free(ptr, Some(q)).unwrap();
    manager.finalize().unwrap();
}
