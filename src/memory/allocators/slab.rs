/*!
 * Slab Allocator
 * Fixed-size slots pre-partitioned into size classes over one native memory object
 */

use crate::core::types::{align_up, DeviceSize};
use crate::memory::traits::{check_alignment, SubAllocator};
use crate::memory::types::{
    Allocation, BlockSlot, HeapKind, MemoryError, MemoryResult, MemoryType, SlabClass,
};

#[derive(Debug, Clone)]
struct Slot {
    offset: DeviceSize,
    aligned_offset: DeviceSize,
    state: MemoryType,
    generation: u32,
}

#[derive(Debug)]
struct SizeClass {
    size: DeviceSize,
    slots: Vec<Slot>,
}

/// Slab allocator bookkeeping for one heap.
/// Classes are laid out contiguously in ascending slot-size order.
#[derive(Debug)]
pub struct SlabAllocator {
    capacity: DeviceSize,
    classes: Vec<SizeClass>,
    live: usize,
}

impl SlabAllocator {
    pub fn new(classes: &[SlabClass]) -> Self {
        let mut ordered = classes.to_vec();
        ordered.sort_by_key(|class| class.size);

        let mut offset = 0;
        let classes = ordered
            .iter()
            .map(|class| {
                let base = offset;
                offset += class.total();
                SizeClass {
                    size: class.size,
                    slots: (0..class.count as DeviceSize)
                        .map(|idx| {
                            let slot_offset = base + class.size * idx;
                            Slot {
                                offset: slot_offset,
                                aligned_offset: slot_offset,
                                state: MemoryType::Free,
                                generation: 0,
                            }
                        })
                        .collect(),
                }
            })
            .collect();

        Self {
            capacity: offset,
            classes,
            live: 0,
        }
    }

    /// Total number of slots across every class
    pub fn slot_count(&self) -> usize {
        self.classes.iter().map(|class| class.slots.len()).sum()
    }

    /// Slot size of the largest class
    pub fn largest_slot(&self) -> DeviceSize {
        self.classes.last().map_or(0, |class| class.size)
    }
}

impl SubAllocator for SlabAllocator {
    fn kind(&self) -> HeapKind {
        HeapKind::Slab
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

        for (class_idx, class) in self.classes.iter_mut().enumerate() {
            let slot_size = class.size;
            if slot_size < size {
                continue;
            }

            for (slot_idx, slot) in class.slots.iter_mut().enumerate() {
                if !slot.state.is_free() {
                    continue;
                }

                let aligned = align_up(slot.offset, alignment).unwrap_or(DeviceSize::MAX);
                let available = (slot.offset + slot_size).saturating_sub(aligned);
                if available < size {
                    // Give up on this class for the request
                    break;
                }

                slot.aligned_offset = aligned;
                slot.state = usage;
                slot.generation = slot.generation.wrapping_add(1);
                self.live += 1;

                return Ok(Allocation {
                    slot: BlockSlot::Slab {
                        class: class_idx,
                        slot: slot_idx,
                        generation: slot.generation,
                    },
                    offset: aligned,
                    size: available,
                });
            }
        }

        Err(MemoryError::OutOfMemory {
            requested: size,
            alignment,
            strategy: HeapKind::Slab,
        })
    }

    fn free(&mut self, slot: BlockSlot) -> MemoryResult<()> {
        let BlockSlot::Slab {
            class,
            slot: slot_idx,
            generation,
        } = slot
        else {
            return Err(MemoryError::UseAfterFree(format!(
                "{:?} does not belong to a slab heap",
                slot
            )));
        };

        let entry = self
            .classes
            .get_mut(class)
            .and_then(|class| class.slots.get_mut(slot_idx))
            .filter(|entry| entry.generation == generation && !entry.state.is_free())
            .ok_or_else(|| {
                MemoryError::UseAfterFree(format!(
                    "slab slot {}/{} is not allocated",
                    class, slot_idx
                ))
            })?;

        entry.aligned_offset = entry.offset;
        entry.state = MemoryType::Free;
        self.live -= 1;
        Ok(())
    }

    fn is_empty(&mut self) -> bool {
        self.classes
            .iter()
            .flat_map(|class| class.slots.iter())
            .all(|slot| slot.state.is_free())
    }

    fn live_allocations(&self) -> usize {
        self.live
    }
}
