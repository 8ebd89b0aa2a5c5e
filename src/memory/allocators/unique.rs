/*!
 * Unique Allocator
 * One dedicated native memory object per request, tracked for bulk release
 */

use crate::core::types::{align_up, DeviceSize, MemoryHandle, TypeIndex};
use crate::device::NativeDevice;
use crate::memory::heap::MappingCache;
use crate::memory::traits::check_alignment;
use crate::memory::types::{Allocation, BlockSlot, HeapKind, MemoryError, MemoryResult, MemoryType};
use ahash::HashMap;
use std::ptr::NonNull;
use tracing::debug;

#[derive(Debug)]
struct DedicatedObject {
    size: DeviceSize,
    usage: MemoryType,
    mapping: MappingCache,
}

#[derive(Debug)]
pub struct UniqueAllocator {
    type_index: TypeIndex,
    objects: HashMap<MemoryHandle, DedicatedObject>,
}

impl UniqueAllocator {
    pub fn new(type_index: TypeIndex) -> Self {
        Self {
            type_index,
            objects: HashMap::default(),
        }
    }

    /// Allocate a native object sized to the alignment-padded request
    pub fn allocate(
        &mut self,
        device: &dyn NativeDevice,
        usage: MemoryType,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<Allocation> {
        check_alignment(alignment)?;
        let padded = align_up(size, alignment).ok_or(MemoryError::OutOfMemory {
            requested: size,
            alignment,
            strategy: HeapKind::Unique,
        })?;

        let memory = device.allocate_memory(self.type_index, padded)?;
        self.objects.insert(
            memory,
            DedicatedObject {
                size: padded,
                usage,
                mapping: MappingCache::default(),
            },
        );
        debug!(%memory, size = padded, %usage, "Dedicated allocation");

        Ok(Allocation {
            slot: BlockSlot::Unique(memory),
            offset: 0,
            size: padded,
        })
    }

    fn object_mut(&mut self, memory: MemoryHandle) -> MemoryResult<&mut DedicatedObject> {
        self.objects
            .get_mut(&memory)
            .ok_or_else(|| MemoryError::UseAfterFree(format!("{} is not a live dedicated object", memory)))
    }

    /// Release one dedicated object
    pub fn free(&mut self, device: &dyn NativeDevice, memory: MemoryHandle) -> MemoryResult<()> {
        let mappings = self.object_mut(memory)?.mapping.count();
        if mappings > 0 {
            return Err(MemoryError::StillMapped(mappings));
        }

        self.objects.remove(&memory);
        device.free_memory(memory);
        Ok(())
    }

    /// Release every tracked object and clear the set. Returns the number released.
    pub fn release_all(&mut self, device: &dyn NativeDevice) -> MemoryResult<usize> {
        let mappings = self.map_count();
        if mappings > 0 {
            return Err(MemoryError::StillMapped(mappings));
        }

        let released = self.objects.len();
        for (memory, _) in self.objects.drain() {
            device.free_memory(memory);
        }
        Ok(released)
    }

    pub fn map(&mut self, device: &dyn NativeDevice, memory: MemoryHandle) -> MemoryResult<NonNull<u8>> {
        let object = self.object_mut(memory)?;
        let size = object.size;
        object.mapping.map(device, memory, size)
    }

    pub fn unmap(&mut self, device: &dyn NativeDevice, memory: MemoryHandle) -> MemoryResult<()> {
        self.object_mut(memory)?.mapping.unmap(device, memory)
    }

    /// Usage class a dedicated object was allocated for
    pub fn usage_of(&self, memory: MemoryHandle) -> Option<MemoryType> {
        self.objects.get(&memory).map(|object| object.usage)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn total_bytes(&self) -> DeviceSize {
        self.objects.values().map(|object| object.size).sum()
    }

    pub fn map_count(&self) -> u32 {
        self.objects.values().map(|object| object.mapping.count()).sum()
    }
}
