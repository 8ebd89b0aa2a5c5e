/*!
 * Allocator Property Tests
 * Live regions never overlap and always stay inside the heap
 */

use gpu_heap::memory::allocators::{BuddyAllocator, SlabAllocator};
use gpu_heap::memory::{Allocation, MemoryType, SlabClass, SubAllocator};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Alloc { size: u64, align_shift: u32, image: bool },
    Free(usize),
}

fn op_strategy(max_size: u64) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1..=max_size, 0u32..12, any::<bool>())
            .prop_map(|(size, align_shift, image)| Op::Alloc { size, align_shift, image }),
        1 => any::<usize>().prop_map(Op::Free),
    ]
}

fn assert_disjoint(live: &[Allocation], capacity: u64) {
    for (i, a) in live.iter().enumerate() {
        assert!(a.offset + a.size <= capacity, "{:?} exceeds capacity {}", a, capacity);
        for b in &live[i + 1..] {
            let overlap = a.offset < b.offset + b.size && b.offset < a.offset + a.size;
            assert!(!overlap, "{:?} overlaps {:?}", a, b);
        }
    }
}

fn run<A: SubAllocator>(allocator: &mut A, ops: Vec<Op>) {
    let capacity = allocator.capacity();
    let mut live: Vec<(Allocation, u64)> = Vec::new();

    for op in ops {
        match op {
            Op::Alloc {
                size,
                align_shift,
                image,
            } => {
                let alignment = 1u64 << align_shift;
                let usage = if image { MemoryType::Image } else { MemoryType::Buffer };
                if let Ok(allocation) = allocator.allocate(usage, size, alignment) {
                    assert_eq!(allocation.offset % alignment, 0);
                    assert!(allocation.size >= size);
                    live.push((allocation, size));
                }
            }
            Op::Free(idx) if !live.is_empty() => {
                let (allocation, _) = live.swap_remove(idx % live.len());
                allocator.free(allocation.slot).unwrap();
            }
            Op::Free(_) => {}
        }

        let regions: Vec<Allocation> = live.iter().map(|(a, _)| *a).collect();
        assert_disjoint(&regions, capacity);
        assert_eq!(allocator.live_allocations(), live.len());
    }

    for (allocation, _) in live.drain(..) {
        allocator.free(allocation.slot).unwrap();
    }
    assert!(allocator.is_empty());
}

proptest! {
    #[test]
    fn prop_buddy_regions_never_overlap(ops in prop::collection::vec(op_strategy(96 * 1024), 1..64)) {
        let mut buddy = BuddyAllocator::new(1 << 20, 4096);
        run(&mut buddy, ops);
    }

    #[test]
    fn prop_slab_regions_never_overlap(ops in prop::collection::vec(op_strategy(32 * 1024), 1..64)) {
        let mut slab = SlabAllocator::new(&[
            SlabClass::new(4096, 8),
            SlabClass::new(8192, 4),
            SlabClass::new(32 * 1024, 2),
        ]);
        run(&mut slab, ops);
    }

    #[test]
    fn prop_buddy_collapses_after_free(sizes in prop::collection::vec(1u64..=64 * 1024, 1..16)) {
        let mut buddy = BuddyAllocator::new(1 << 20, 4096);
        let slots: Vec<_> = sizes
            .iter()
            .filter_map(|&size| buddy.allocate(MemoryType::Buffer, size, 256).ok())
            .map(|allocation| allocation.slot)
            .collect();
        for slot in slots {
            buddy.free(slot).unwrap();
        }
        prop_assert!(buddy.is_empty());
        prop_assert_eq!(buddy.node_count(), 1);
    }
}
