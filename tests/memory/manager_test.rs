/*!
 * Memory Manager Tests
 * Routing at the size thresholds, pool growth, garbage collection and teardown
 */

use gpu_heap::device::HostDevice;
use gpu_heap::{
    DeviceHandle, HeapKind, ManagerConfig, MemoryError, MemoryManager, MemoryPropertyFlags,
    MemoryRequirements, MemoryType, RequestClass,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn setup() -> (Arc<HostDevice>, MemoryManager) {
    let host = Arc::new(HostDevice::default());
    let manager = MemoryManager::new(DeviceHandle::new(host.clone())).unwrap();
    (host, manager)
}

fn device_local(size: u64) -> MemoryRequirements {
    MemoryRequirements::new(size, 256, 0b1)
}

#[test]
fn test_routing_at_threshold_boundaries() {
    let (_host, mut manager) = setup();
    let large = manager.config().large_alloc_threshold;
    let small = manager.config().small_alloc_threshold;
    let flags = MemoryPropertyFlags::DEVICE_LOCAL;

    let cases = [
        (large + 1, HeapKind::Unique),
        (large, HeapKind::Buddy),
        (small + 1, HeapKind::Buddy),
        (small, HeapKind::Slab),
        (1, HeapKind::Slab),
    ];

    for (size, expected) in cases {
        let block = manager.allocate_buffer_memory(&device_local(size), flags).unwrap();
        assert_eq!(block.kind(), expected, "size {}", size);
        assert!(block.size() >= size);
        block.free().unwrap();
    }
}

#[test]
fn test_unique_heap_created_once_per_type() {
    let (host, mut manager) = setup();
    let size = manager.config().large_alloc_threshold + 4096;

    let a = manager
        .allocate_image_memory(&device_local(size), MemoryPropertyFlags::empty())
        .unwrap();
    let b = manager
        .allocate_image_memory(&device_local(size), MemoryPropertyFlags::empty())
        .unwrap();

    assert!(a.heap().ptr_eq(b.heap()));
    assert_ne!(a.memory(), b.memory());
    assert_eq!(a.offset(), 0);
    assert_eq!(host.live_objects(), 2);
    assert_eq!(manager.heap_count(MemoryType::Image, RequestClass::Large, 0), 1);
    assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Large, 0), 0);
}

#[test]
fn test_existing_heaps_are_tried_before_growing() {
    let (host, mut manager) = setup();
    let reqs = device_local(1 << 20);

    let blocks: Vec<_> = (0..8)
        .map(|_| {
            manager
                .allocate_buffer_memory(&reqs, MemoryPropertyFlags::empty())
                .unwrap()
        })
        .collect();

    assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Standard, 0), 1);
    assert_eq!(host.live_objects(), 1);
    for block in &blocks {
        assert!(block.heap().ptr_eq(blocks[0].heap()));
    }
}

#[test]
fn test_full_standard_heap_grows_pool() {
    let host = Arc::new(HostDevice::default());
    let config = ManagerConfig::new()
        .with_large_threshold(1 << 20)
        .with_buffer_heap_size(1 << 20)
        .with_image_heap_size(1 << 20);
    let mut manager = MemoryManager::with_config(DeviceHandle::new(host.clone()), config).unwrap();

    let reqs = device_local(1 << 19);
    let _a = manager.allocate_buffer_memory(&reqs, MemoryPropertyFlags::empty()).unwrap();
    let _b = manager.allocate_buffer_memory(&reqs, MemoryPropertyFlags::empty()).unwrap();
    assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Standard, 0), 1);

    let _c = manager.allocate_buffer_memory(&reqs, MemoryPropertyFlags::empty()).unwrap();
    assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Standard, 0), 2);
    assert_eq!(host.live_objects(), 2);
}

#[test]
fn test_unsupported_memory_type() {
    let (_host, mut manager) = setup();
    let reqs = MemoryRequirements::new(1024, 256, 0b1);
    let err = manager
        .allocate_buffer_memory(&reqs, MemoryPropertyFlags::HOST_VISIBLE)
        .unwrap_err();
    assert_eq!(
        err,
        MemoryError::UnsupportedMemoryType {
            type_bits: 0b1,
            required: MemoryPropertyFlags::HOST_VISIBLE.bits(),
        }
    );
}

#[test]
fn test_garbage_collect_reclaims_empty_heaps() {
    let (host, mut manager) = setup();

    let small = manager
        .allocate_buffer_memory(&device_local(1024), MemoryPropertyFlags::empty())
        .unwrap();
    let standard = manager
        .allocate_image_memory(&device_local(1 << 20), MemoryPropertyFlags::empty())
        .unwrap();
    assert_eq!(host.live_objects(), 2);

    // Nothing is empty yet
    let stats = manager.garbage_collect();
    assert_eq!(stats.heaps_released, 0);
    assert_eq!(stats.heaps_retained, 2);

    small.free().unwrap();
    standard.free().unwrap();

    let stats = manager.garbage_collect();
    assert_eq!(stats.heaps_released, 2);
    assert_eq!(host.live_objects(), 0);
    assert_eq!(host.used_bytes(0), 0);
    assert_eq!(manager.stats().heap_count, 0);
}

#[test]
fn test_collected_pool_grows_again() {
    let (host, mut manager) = setup();
    let block = manager
        .allocate_buffer_memory(&device_local(1024), MemoryPropertyFlags::empty())
        .unwrap();
    block.free().unwrap();
    manager.garbage_collect();

    manager
        .allocate_buffer_memory(&device_local(1024), MemoryPropertyFlags::empty())
        .unwrap()
        .free()
        .unwrap();
    assert_eq!(host.counters().allocations, 2);
}

#[test]
fn test_pool_recovers_from_heap_released_by_caller() {
    let (host, mut manager) = setup();
    let stale = manager
        .allocate_buffer_memory(&device_local(1024), MemoryPropertyFlags::empty())
        .unwrap();
    stale.heap().release().unwrap();
    assert_eq!(host.live_objects(), 0);

    let fresh = manager
        .allocate_buffer_memory(&device_local(1024), MemoryPropertyFlags::empty())
        .unwrap();
    assert!(!fresh.heap().ptr_eq(stale.heap()));
    assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Small, 0), 1);
    assert_eq!(host.live_objects(), 1);

    fresh.free().unwrap();
    let stats = manager.garbage_collect();
    assert_eq!(stats.heaps_released, 1);
    assert_eq!(stats.heaps_retained, 0);
    assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Small, 0), 0);
    assert!(matches!(stale.free(), Err(MemoryError::UseAfterFree(_))));
}

#[test]
fn test_collect_forgets_released_heaps() {
    let (_host, mut manager) = setup();
    let stale = manager
        .allocate_buffer_memory(&device_local(64 * 1024), MemoryPropertyFlags::empty())
        .unwrap();
    stale.heap().release().unwrap();

    let stats = manager.garbage_collect();
    assert_eq!(stats.heaps_retained, 0);
    assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Standard, 0), 0);
    assert_eq!(manager.stats().heap_count, 0);
}

#[test]
fn test_free_all_releases_everything() {
    let (host, mut manager) = setup();
    let large = manager.config().large_alloc_threshold + 1;

    let _blocks = [
        manager
            .allocate_buffer_memory(&device_local(512), MemoryPropertyFlags::empty())
            .unwrap(),
        manager
            .allocate_image_memory(&device_local(1 << 20), MemoryPropertyFlags::empty())
            .unwrap(),
        manager
            .allocate_image_memory(&device_local(large), MemoryPropertyFlags::empty())
            .unwrap(),
    ];
    assert_eq!(host.live_objects(), 3);

    manager.free_all().unwrap();
    assert_eq!(host.live_objects(), 0);
    assert_eq!(manager.stats().heap_count, 0);
}

#[test]
fn test_device_lost() {
    let host = Arc::new(HostDevice::default());
    let device = DeviceHandle::new(host.clone());
    let mut manager = MemoryManager::new(device.clone()).unwrap();
    let mut block = manager
        .allocate_buffer_memory(&MemoryRequirements::new(512, 256, 0b10), MemoryPropertyFlags::empty())
        .unwrap();

    device.invalidate();

    assert_eq!(
        manager
            .allocate_buffer_memory(&device_local(512), MemoryPropertyFlags::empty())
            .unwrap_err(),
        MemoryError::DeviceLost
    );
    assert_eq!(block.map().unwrap_err(), MemoryError::DeviceLost);
    assert_eq!(block.free().unwrap_err(), MemoryError::DeviceLost);

    drop(manager);
    assert_eq!(host.counters().frees, 0);
}

#[test]
fn test_stats_serialize() {
    let (_host, mut manager) = setup();
    let _block = manager
        .allocate_buffer_memory(&device_local(1024), MemoryPropertyFlags::empty())
        .unwrap();

    let stats = manager.stats();
    assert_eq!(stats.heap_count, 1);
    assert_eq!(stats.live_allocations, 1);
    assert_eq!(stats.native_bytes, 4 << 20);

    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"kind\":\"slab\""));
}
