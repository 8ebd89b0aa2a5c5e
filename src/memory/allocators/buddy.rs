/*!
 * Buddy Block Allocator
 *
 * Binary tree over one native memory object. Leaves are split in halves on demand and
 * halves are merged back lazily: `reclaim` runs before each allocation and before the
 * emptiness check, never on free.
 *
 * Search is depth-first and leftmost-first. Once a node is split its boundary stays until
 * both direct children are free again; there is no merging across subtrees, so a free
 * half whose sibling is still occupied is only reachable by requests that fit inside it.
 */

use crate::core::types::{align_up, DeviceSize};
use crate::memory::traits::{check_alignment, SubAllocator};
use crate::memory::types::{Allocation, BlockSlot, HeapKind, MemoryError, MemoryResult, MemoryType};

const ROOT: usize = 0;

/// A tree node stored in the allocator's arena
#[derive(Debug, Clone)]
struct BuddyNode {
    offset: DeviceSize,
    size: DeviceSize,
    aligned_offset: DeviceSize,
    state: MemoryType,
    children: Option<(usize, usize)>,
    /// Bumped every time the node is handed out, so stale blocks are detected
    generation: u32,
}

impl BuddyNode {
    fn new(offset: DeviceSize, size: DeviceSize) -> Self {
        Self {
            offset,
            size,
            aligned_offset: offset,
            state: MemoryType::Free,
            children: None,
            generation: 0,
        }
    }

    fn align(&mut self, alignment: DeviceSize) {
        self.aligned_offset = align_up(self.offset, alignment).unwrap_or(DeviceSize::MAX);
    }

    /// Bytes from the aligned offset to the end of the node
    fn available(&self) -> DeviceSize {
        available_at(self.offset, self.size, self.aligned_offset)
    }

    fn is_free_leaf(&self) -> bool {
        self.children.is_none() && self.state.is_free()
    }
}

fn available_at(offset: DeviceSize, size: DeviceSize, aligned_offset: DeviceSize) -> DeviceSize {
    (offset + size).saturating_sub(aligned_offset)
}

/// Buddy allocator bookkeeping for one heap
#[derive(Debug)]
pub struct BuddyAllocator {
    capacity: DeviceSize,
    min_subdivision: DeviceSize,
    nodes: Vec<BuddyNode>,
    recycled: Vec<usize>,
    live: usize,
}

impl BuddyAllocator {
    pub fn new(capacity: DeviceSize, min_subdivision: DeviceSize) -> Self {
        Self {
            capacity,
            min_subdivision,
            nodes: vec![BuddyNode::new(0, capacity)],
            recycled: Vec::new(),
            live: 0,
        }
    }

    pub fn min_subdivision(&self) -> DeviceSize {
        self.min_subdivision
    }

    /// Number of nodes currently part of the tree
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.recycled.len()
    }

    /// Collapse every internal node whose two children are free leaves (post-order)
    pub fn reclaim(&mut self) {
        self.reclaim_node(ROOT);
    }

    fn reclaim_node(&mut self, id: usize) {
        let Some((left, right)) = self.nodes[id].children else {
            return;
        };

        self.reclaim_node(left);
        self.reclaim_node(right);

        if self.nodes[left].is_free_leaf() && self.nodes[right].is_free_leaf() {
            let node = &mut self.nodes[id];
            node.children = None;
            node.state = MemoryType::Free;
            node.aligned_offset = node.offset;
            self.recycled.push(left);
            self.recycled.push(right);
        }
    }

    fn insert_node(&mut self, offset: DeviceSize, size: DeviceSize) -> usize {
        match self.recycled.pop() {
            Some(id) => {
                let generation = self.nodes[id].generation;
                self.nodes[id] = BuddyNode {
                    generation,
                    ..BuddyNode::new(offset, size)
                };
                id
            }
            None => {
                self.nodes.push(BuddyNode::new(offset, size));
                self.nodes.len() - 1
            }
        }
    }

    /// Depth-first, left-before-right search for a leaf that can hold `size` bytes
    fn search(&mut self, id: usize, size: DeviceSize, alignment: DeviceSize) -> Option<usize> {
        if let Some((left, right)) = self.nodes[id].children {
            if let Some(found) = self.search(left, size, alignment) {
                return Some(found);
            }
            return self.search(right, size, alignment);
        }

        let node = &mut self.nodes[id];
        if !node.state.is_free() {
            return None;
        }

        node.align(alignment);
        if node.available() < size {
            return None;
        }

        let half = node.size / 2;
        if half < size || half < self.min_subdivision {
            // Halving would be too small; accept the internal fragmentation
            return Some(id);
        }

        let offset = node.offset;
        let fits = |start: DeviceSize| match align_up(start, alignment) {
            Some(aligned) => available_at(start, half, aligned) >= size,
            None => false,
        };
        let left_fits = fits(offset);
        let right_fits = fits(offset + half);
        if !left_fits && !right_fits {
            return Some(id);
        }

        let left = self.insert_node(offset, half);
        let right = self.insert_node(offset + half, half);
        self.nodes[left].align(alignment);
        self.nodes[right].align(alignment);

        let parent = &mut self.nodes[id];
        parent.children = Some((left, right));
        parent.state = MemoryType::Unknown;

        let found = if left_fits {
            self.search(left, size, alignment)
        } else {
            None
        };
        found.or_else(|| {
            if right_fits {
                self.search(right, size, alignment)
            } else {
                None
            }
        })
    }
}

impl SubAllocator for BuddyAllocator {
    fn kind(&self) -> HeapKind {
        HeapKind::Buddy
    }

    fn capacity(&self) -> DeviceSize {
        self.capacity
    }

    fn allocate(
        &mut self,
        usage: MemoryType,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<Allocation> {
        check_alignment(alignment)?;
        self.reclaim();

        let id = self
            .search(ROOT, size, alignment)
            .ok_or(MemoryError::OutOfMemory {
                requested: size,
                alignment,
                strategy: HeapKind::Buddy,
            })?;

        let node = &mut self.nodes[id];
        node.state = usage;
        node.align(alignment);
        node.generation = node.generation.wrapping_add(1);
        self.live += 1;

        Ok(Allocation {
            slot: BlockSlot::Buddy {
                node: id,
                generation: node.generation,
            },
            offset: node.aligned_offset,
            size: node.available(),
        })
    }

    fn free(&mut self, slot: BlockSlot) -> MemoryResult<()> {
        let BlockSlot::Buddy { node, generation } = slot else {
            return Err(MemoryError::UseAfterFree(format!(
                "{:?} does not belong to a buddy heap",
                slot
            )));
        };

        let stale = || MemoryError::UseAfterFree(format!("buddy node {} is not allocated", node));
        let entry = self.nodes.get_mut(node).ok_or_else(stale)?;
        if entry.generation != generation
            || entry.children.is_some()
            || matches!(entry.state, MemoryType::Free | MemoryType::Unknown)
        {
            return Err(stale());
        }

        entry.state = MemoryType::Free;
        entry.aligned_offset = entry.offset;
        self.live -= 1;
        Ok(())
    }

    fn is_empty(&mut self) -> bool {
        self.reclaim();
        self.nodes[ROOT].is_free_leaf()
    }

    fn live_allocations(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: DeviceSize = 1024;

    #[test]
    fn test_split_and_coalesce_round_trip() {
        let mut buddy = BuddyAllocator::new(1024 * KIB, 4 * KIB);
        let alloc = buddy
            .allocate(MemoryType::Buffer, 100 * KIB, 256)
            .unwrap();

        // 1MB -> 512 -> 256 -> 128: the 128KB leftmost leaf holds the request
        assert_eq!(alloc.offset, 0);
        assert_eq!(alloc.size, 128 * KIB);
        assert!(buddy.node_count() > 1);
        assert!(!buddy.is_empty());

        buddy.free(alloc.slot).unwrap();
        buddy.reclaim();
        assert_eq!(buddy.node_count(), 1);
        assert!(buddy.is_empty());
    }

    #[test]
    fn test_min_subdivision_stops_splitting() {
        let mut buddy = BuddyAllocator::new(64 * KIB, 32 * KIB);
        let alloc = buddy.allocate(MemoryType::Image, 1024, 16).unwrap();
        // Halving 32KB would go below the minimum subdivision
        assert_eq!(alloc.size, 32 * KIB);
    }

    #[test]
    fn test_second_allocation_takes_sibling() {
        let mut buddy = BuddyAllocator::new(256 * KIB, 4 * KIB);
        let a = buddy.allocate(MemoryType::Buffer, 100 * KIB, 1).unwrap();
        let b = buddy.allocate(MemoryType::Buffer, 100 * KIB, 1).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 128 * KIB);

        let err = buddy.allocate(MemoryType::Buffer, 1, 1).unwrap_err();
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn test_alignment_shrinks_block() {
        let mut buddy = BuddyAllocator::new(64 * KIB, 4 * KIB);
        let first = buddy.allocate(MemoryType::Buffer, 4 * KIB, 4 * KIB).unwrap();
        assert_eq!(first.offset, 0);

        // Next free leaf starts at 4KB; 16KB alignment pushes it past the leaf, so
        // the search moves on to a leaf that starts on a 16KB boundary.
        let aligned = buddy.allocate(MemoryType::Buffer, 2 * KIB, 16 * KIB).unwrap();
        assert_eq!(aligned.offset % (16 * KIB), 0);
        assert!(aligned.offset >= 16 * KIB);
    }

    #[test]
    fn test_whole_heap_request() {
        let mut buddy = BuddyAllocator::new(128 * KIB, 4 * KIB);
        let alloc = buddy.allocate(MemoryType::Image, 128 * KIB, 4 * KIB).unwrap();
        assert_eq!(alloc.offset, 0);
        assert_eq!(alloc.size, 128 * KIB);
        assert!(buddy.allocate(MemoryType::Image, 1, 1).is_err());
    }

    #[test]
    fn test_double_free_is_detected() {
        let mut buddy = BuddyAllocator::new(64 * KIB, 4 * KIB);
        let alloc = buddy.allocate(MemoryType::Buffer, 4 * KIB, 1).unwrap();
        buddy.free(alloc.slot).unwrap();
        assert!(matches!(
            buddy.free(alloc.slot),
            Err(MemoryError::UseAfterFree(_))
        ));
    }

    #[test]
    fn test_recycled_node_rejects_stale_slot() {
        let mut buddy = BuddyAllocator::new(64 * KIB, 4 * KIB);
        let first = buddy.allocate(MemoryType::Buffer, 4 * KIB, 1).unwrap();
        buddy.free(first.slot).unwrap();

        let second = buddy.allocate(MemoryType::Buffer, 4 * KIB, 1).unwrap();
        assert_eq!(second.offset, first.offset);
        assert!(buddy.free(first.slot).is_err());
        assert!(buddy.free(second.slot).is_ok());
    }

    #[test]
    fn test_coalescing_is_lazy() {
        let mut buddy = BuddyAllocator::new(64 * KIB, 4 * KIB);
        let alloc = buddy.allocate(MemoryType::Buffer, 4 * KIB, 1).unwrap();
        let nodes = buddy.node_count();
        buddy.free(alloc.slot).unwrap();
        assert_eq!(buddy.node_count(), nodes);
        assert!(buddy.is_empty());
        assert_eq!(buddy.node_count(), 1);
    }

    #[test]
    fn test_invalid_alignment() {
        let mut buddy = BuddyAllocator::new(64 * KIB, 4 * KIB);
        assert_eq!(
            buddy.allocate(MemoryType::Buffer, 16, 3),
            Err(MemoryError::InvalidAlignment(3))
        );
    }
}
