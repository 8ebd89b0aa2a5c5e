/*!
 * Heap Tests
 * Mapping reference counts, stack frames and usage-conflict padding on standalone heaps
 */

use gpu_heap::device::HostDevice;
use gpu_heap::{DeviceHandle, HeapHandle, HeapKind, MemoryError, MemoryType, SlabClass, StackPop};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn setup() -> (Arc<HostDevice>, DeviceHandle) {
    let host = Arc::new(HostDevice::default());
    let device = DeviceHandle::new(host.clone());
    (host, device)
}

#[test]
fn test_nested_maps_share_one_native_mapping() {
    let (host, device) = setup();
    let heap = HeapHandle::buddy(&device, 1, 4096, 1 << 20).unwrap();
    let mut a = heap.allocate(MemoryType::Buffer, 4096, 256).unwrap();
    let mut b = heap.allocate(MemoryType::Buffer, 4096, 256).unwrap();

    let mut view_a = a.map().unwrap();
    let mut view_b = b.map().unwrap();
    assert_eq!(host.counters().maps, 1);
    assert_eq!(heap.map_count(), 2);

    view_a[0] = 1;
    view_b[0] = 2;
    assert_ne!(view_a.as_ptr(), view_b.as_ptr());

    drop(view_a);
    assert!(host.is_mapped(heap.memory().unwrap()));
    assert_eq!(host.counters().unmaps, 0);

    drop(view_b);
    assert!(!host.is_mapped(heap.memory().unwrap()));
    assert_eq!(host.counters().unmaps, 1);

    // A later map goes back to the backend
    assert_eq!(a.map().unwrap()[0], 1);
    assert_eq!(host.counters().maps, 2);
}

#[test]
fn test_release_refused_while_mapped() {
    let (host, device) = setup();
    let heap = HeapHandle::slab(&device, 1, &[SlabClass::new(1024, 8)]).unwrap();
    let mut block = heap.allocate(MemoryType::Buffer, 512, 16).unwrap();

    let view = block.map().unwrap();
    assert_eq!(heap.release(), Err(MemoryError::StillMapped(1)));
    drop(view);

    heap.release().unwrap();
    assert_eq!(host.live_objects(), 0);
}

#[test]
fn test_stack_heap_lifo() {
    let (_host, device) = setup();
    let heap = HeapHandle::stack(&device, 1, 1 << 20).unwrap();
    assert_eq!(heap.kind(), HeapKind::Stack);

    heap.push().unwrap();
    let outer = heap.allocate(MemoryType::Buffer, 4096, 256).unwrap();

    heap.push().unwrap();
    let inner = heap.allocate(MemoryType::Buffer, 4096, 256).unwrap();
    assert!(inner.offset() + inner.size() <= outer.offset());
    assert_eq!(heap.stats().allocations, 2);

    assert_eq!(heap.pop().unwrap(), StackPop::Restored(outer.offset()));
    assert_eq!(heap.stats().allocations, 1);

    // Space of the inner frame is handed out again
    let again = heap.allocate(MemoryType::Buffer, 4096, 256).unwrap();
    assert_eq!(again.offset(), inner.offset());

    assert_eq!(heap.pop().unwrap(), StackPop::Restored(1 << 20));
    assert!(heap.is_empty());
}

#[test]
fn test_stack_pop_without_frame_tears_down() {
    let (host, device) = setup();
    let heap = HeapHandle::stack(&device, 1, 1 << 16).unwrap();
    let _block = heap.allocate(MemoryType::Image, 1024, 256).unwrap();

    assert_eq!(heap.pop().unwrap(), StackPop::Released);
    assert!(heap.is_released());
    assert_eq!(host.live_objects(), 0);
    assert!(matches!(
        heap.allocate(MemoryType::Image, 16, 16),
        Err(MemoryError::UseAfterFree(_))
    ));
}

#[test]
fn test_stack_frames_restore_usage() {
    let (_host, device) = setup();
    let heap = HeapHandle::stack(&device, 1, 1 << 16).unwrap();
    let granularity = 1024;

    heap.allocate(MemoryType::Buffer, 100, 16).unwrap();
    heap.push().unwrap();
    heap.allocate(MemoryType::Image, 100, 16).unwrap();
    heap.pop().unwrap();

    // The buffer neighbour is back, so another buffer packs without padding
    let packed = heap.allocate(MemoryType::Buffer, 100, 16).unwrap();
    assert_ne!(packed.offset() % granularity, 0);
}

#[test]
fn test_linear_conflict_padding() {
    let (_host, device) = setup();
    let heap = HeapHandle::linear(&device, 1, 1 << 20).unwrap();

    let buffer = heap.allocate(MemoryType::Buffer, 100, 16).unwrap();
    let buffer2 = heap.allocate(MemoryType::Buffer, 100, 16).unwrap();
    let image = heap.allocate(MemoryType::Image, 100, 16).unwrap();

    assert_eq!(buffer.offset(), 0);
    assert_eq!(buffer2.offset(), 112);
    assert_eq!(image.offset(), 1024);
}

#[test]
fn test_stack_conflict_padding() {
    let (_host, device) = setup();
    let heap = HeapHandle::stack(&device, 1, 1 << 16).unwrap();

    let image = heap.allocate(MemoryType::Image, 100, 16).unwrap();
    let buffer = heap.allocate(MemoryType::Buffer, 100, 16).unwrap();

    assert_eq!(image.offset(), (1 << 16) - 112);
    assert_eq!(buffer.offset(), (1 << 16) - 1024);
}

#[test]
fn test_linear_blocks_free_without_reclaiming() {
    let (_host, device) = setup();
    let heap = HeapHandle::linear(&device, 1, 1 << 16).unwrap();
    let block = heap.allocate(MemoryType::Buffer, 4096, 16).unwrap();
    block.free().unwrap();

    assert!(!heap.is_empty());
    let next = heap.allocate(MemoryType::Buffer, 16, 16).unwrap();
    assert_eq!(next.offset(), 4096);
}

#[test]
fn test_unique_heap_release_frees_every_object() {
    let (host, device) = setup();
    let heap = HeapHandle::unique(&device, 0).unwrap();
    let _a = heap.allocate(MemoryType::Image, 1 << 20, 4096).unwrap();
    let _b = heap.allocate(MemoryType::Image, 3 << 20, 4096).unwrap();

    assert_eq!(heap.footprint(), 4 << 20);
    assert_eq!(host.live_objects(), 2);

    heap.release().unwrap();
    assert_eq!(host.live_objects(), 0);
    assert_eq!(heap.footprint(), 0);
}

#[test]
fn test_invalid_alignment() {
    let (_host, device) = setup();
    let heap = HeapHandle::buddy(&device, 0, 4096, 1 << 16).unwrap();
    assert_eq!(
        heap.allocate(MemoryType::Buffer, 64, 3).unwrap_err(),
        MemoryError::InvalidAlignment(3)
    );
    assert_eq!(
        heap.allocate(MemoryType::Buffer, 64, 0).unwrap_err(),
        MemoryError::InvalidAlignment(0)
    );
}
