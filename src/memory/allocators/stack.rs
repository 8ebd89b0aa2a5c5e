/*!
 * Stack Allocator
 *
 * Bump-down pointer with a fixed-depth stack of saved positions. `push` records the
 * pointer, `pop` releases everything allocated since the matching `push`.
 */

use crate::core::limits::MAX_STACK_FRAMES;
use crate::core::types::{align_down, align_up, DeviceSize};
use crate::memory::traits::{check_alignment, SubAllocator};
use crate::memory::types::{Allocation, BlockSlot, HeapKind, MemoryError, MemoryResult, MemoryType};

#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    pointer: DeviceSize,
    last_usage: MemoryType,
    live: usize,
}

#[derive(Debug)]
pub struct StackAllocator {
    capacity: DeviceSize,
    granularity: DeviceSize,
    pointer: DeviceSize,
    last_usage: MemoryType,
    frames: [Frame; MAX_STACK_FRAMES],
    depth: usize,
    live: usize,
}

impl StackAllocator {
    pub fn new(capacity: DeviceSize, granularity: DeviceSize) -> Self {
        Self {
            capacity,
            granularity: granularity.max(1).next_power_of_two(),
            pointer: capacity,
            last_usage: MemoryType::Free,
            frames: [Frame::default(); MAX_STACK_FRAMES],
            depth: 0,
            live: 0,
        }
    }

    pub fn pointer(&self) -> DeviceSize {
        self.pointer
    }

    /// Number of saved frames
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Save the current position
    pub fn push(&mut self) -> MemoryResult<()> {
        if self.depth == MAX_STACK_FRAMES {
            return Err(MemoryError::StackOverflow(MAX_STACK_FRAMES));
        }

        self.frames[self.depth] = Frame {
            pointer: self.pointer,
            last_usage: self.last_usage,
            live: self.live,
        };
        self.depth += 1;
        Ok(())
    }

    /// Restore the most recent saved position.
    /// Returns `None` at depth zero: the caller owns tearing the heap down.
    pub fn pop(&mut self) -> Option<DeviceSize> {
        if self.depth == 0 {
            return None;
        }

        self.depth -= 1;
        let frame = self.frames[self.depth];
        self.pointer = frame.pointer;
        self.last_usage = frame.last_usage;
        self.live = frame.live;
        Some(self.pointer)
    }
}

impl SubAllocator for StackAllocator {
    fn kind(&self) -> HeapKind {
        HeapKind::Stack
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
        let oom = || MemoryError::OutOfMemory {
            requested: size,
            alignment,
            strategy: HeapKind::Stack,
        };

        let padded = align_up(size, alignment).ok_or_else(oom)?;
        let mut offset = align_down(self.pointer.checked_sub(padded).ok_or_else(oom)?, alignment);
        if self.last_usage.conflicts(usage) {
            offset = align_down(offset, self.granularity);
        }

        self.pointer = offset;
        self.last_usage = usage;
        self.live += 1;

        Ok(Allocation {
            slot: BlockSlot::Stack,
            offset,
            size: padded,
        })
    }

    fn free(&mut self, _slot: BlockSlot) -> MemoryResult<()> {
        Ok(())
    }

    fn is_empty(&mut self) -> bool {
        self.pointer == self.capacity
    }

    fn live_allocations(&self) -> usize {
        self.live
    }
}
