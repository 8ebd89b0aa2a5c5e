/*!
 * Linear Allocator
 * Bump pointer over one native memory object; space comes back only with the heap
 */

use crate::core::types::{align_up, DeviceSize};
use crate::memory::traits::{check_alignment, SubAllocator};
use crate::memory::types::{Allocation, BlockSlot, HeapKind, MemoryError, MemoryResult, MemoryType};

#[derive(Debug)]
pub struct LinearAllocator {
    capacity: DeviceSize,
    granularity: DeviceSize,
    pointer: DeviceSize,
    last_usage: MemoryType,
    live: usize,
}

impl LinearAllocator {
    pub fn new(capacity: DeviceSize, granularity: DeviceSize) -> Self {
        Self {
            capacity,
            granularity: granularity.max(1).next_power_of_two(),
            pointer: 0,
            last_usage: MemoryType::Free,
            live: 0,
        }
    }

    /// Current bump pointer; never decreases
    pub fn pointer(&self) -> DeviceSize {
        self.pointer
    }

    fn out_of_memory(size: DeviceSize, alignment: DeviceSize) -> MemoryError {
        MemoryError::OutOfMemory {
            requested: size,
            alignment,
            strategy: HeapKind::Linear,
        }
    }
}

impl SubAllocator for LinearAllocator {
    fn kind(&self) -> HeapKind {
        HeapKind::Linear
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
        let oom = || Self::out_of_memory(size, alignment);

        let mut start = align_up(self.pointer, alignment).ok_or_else(oom)?;
        if self.last_usage.conflicts(usage) {
            start = align_up(start, self.granularity).ok_or_else(oom)?;
        }

        let padded = align_up(size, alignment).ok_or_else(oom)?;
        let end = start.checked_add(padded).ok_or_else(oom)?;

        // One granularity page of headroom stays reserved at the end of the heap
        match end.checked_add(self.granularity) {
            Some(limit) if limit <= self.capacity => {}
            _ => return Err(oom()),
        }

        self.pointer = end;
        self.last_usage = usage;
        self.live += 1;

        Ok(Allocation {
            slot: BlockSlot::Linear,
            offset: start,
            size: padded,
        })
    }

    fn free(&mut self, _slot: BlockSlot) -> MemoryResult<()> {
        Ok(())
    }

    fn is_empty(&mut self) -> bool {
        self.pointer == 0
    }

    fn live_allocations(&self) -> usize {
        self.live
    }
}
