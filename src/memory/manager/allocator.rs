/*!
 * Memory Manager Allocation
 * Memory-type resolution and size routing
 */

use super::{MemoryManager, RequestClass};
use crate::device::{MemoryPropertyFlags, MemoryRequirements};
use crate::memory::block::MemoryBlock;
use crate::memory::heap::HeapHandle;
use crate::memory::traits::check_alignment;
use crate::memory::types::{MemoryError, MemoryResult, MemoryType};
use tracing::{debug, error};

impl MemoryManager {
    /// Allocate memory for a buffer or image.
    ///
    /// Existing heaps of the resolved memory type are tried in creation order; a new
    /// heap is created only when all of them are full.
    pub fn allocate(
        &mut self,
        usage: MemoryType,
        requirements: &MemoryRequirements,
        required: MemoryPropertyFlags,
    ) -> MemoryResult<MemoryBlock> {
        if !matches!(usage, MemoryType::Buffer | MemoryType::Image) {
            return Err(MemoryError::InvalidUsage(usage));
        }
        self.device.get()?;
        check_alignment(requirements.alignment)?;

        let type_index =
            self.select_memory_type_index(requirements.memory_type_bits, required)?;
        let size = requirements.size;
        let alignment = requirements.alignment;
        let class = self.classify(size);

        debug!(%usage, size, alignment, type_index, ?class, "Routing allocation");

        let result = match (class, usage) {
            (RequestClass::Large, _) => {
                let heaps = if usage == MemoryType::Image {
                    &mut self.large_image_heaps
                } else {
                    &mut self.large_buffer_heaps
                };
                let heap = match heaps.get(&type_index) {
                    Some(heap) => heap.clone(),
                    None => {
                        let heap = HeapHandle::unique(&self.device, type_index)?;
                        heaps.insert(type_index, heap.clone());
                        heap
                    }
                };
                heap.allocate(usage, size, alignment)
            }
            (RequestClass::Small, MemoryType::Image) => {
                self.small_image_pool
                    .allocate(&self.device, type_index, usage, size, alignment)
            }
            (RequestClass::Small, _) => {
                self.small_buffer_pool
                    .allocate(&self.device, type_index, usage, size, alignment)
            }
            (RequestClass::Standard, MemoryType::Image) => {
                self.standard_image_pool
                    .allocate(&self.device, type_index, usage, size, alignment)
            }
            (RequestClass::Standard, _) => {
                self.standard_buffer_pool
                    .allocate(&self.device, type_index, usage, size, alignment)
            }
        };

        if let Err(MemoryError::Native(e)) = &result {
            error!(error = %e, %usage, size, type_index, "Native allocation failed");
        }
        result
    }

    pub fn allocate_buffer_memory(
        &mut self,
        requirements: &MemoryRequirements,
        required: MemoryPropertyFlags,
    ) -> MemoryResult<MemoryBlock> {
        self.allocate(MemoryType::Buffer, requirements, required)
    }

    pub fn allocate_image_memory(
        &mut self,
        requirements: &MemoryRequirements,
        required: MemoryPropertyFlags,
    ) -> MemoryResult<MemoryBlock> {
        self.allocate(MemoryType::Image, requirements, required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceHandle, HostDevice};
    use crate::memory::types::HeapKind;
    use std::sync::Arc;

    fn manager() -> (Arc<HostDevice>, MemoryManager) {
        let host = Arc::new(HostDevice::default());
        let manager = MemoryManager::new(DeviceHandle::new(host.clone())).unwrap();
        (host, manager)
    }

    #[test]
    fn test_routing_by_size() {
        let (_host, mut manager) = manager();
        let flags = MemoryPropertyFlags::DEVICE_LOCAL;

        let small = manager
            .allocate_buffer_memory(&MemoryRequirements::new(256, 256, 0b1), flags)
            .unwrap();
        let standard = manager
            .allocate_buffer_memory(&MemoryRequirements::new(1 << 20, 256, 0b1), flags)
            .unwrap();
        let large = manager
            .allocate_image_memory(&MemoryRequirements::new(200 << 20, 4096, 0b1), flags)
            .unwrap();

        assert_eq!(small.kind(), HeapKind::Slab);
        assert_eq!(standard.kind(), HeapKind::Buddy);
        assert_eq!(large.kind(), HeapKind::Unique);
        assert_eq!(large.size(), 200 << 20);
    }

    #[test]
    fn test_buffers_and_images_use_separate_heaps() {
        let (host, mut manager) = manager();
        let reqs = MemoryRequirements::new(1024, 256, 0b1);

        let buffer = manager.allocate_buffer_memory(&reqs, MemoryPropertyFlags::empty()).unwrap();
        let image = manager.allocate_image_memory(&reqs, MemoryPropertyFlags::empty()).unwrap();

        assert!(!buffer.heap().ptr_eq(image.heap()));
        assert_eq!(host.live_objects(), 2);
        assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Small, 0), 1);
        assert_eq!(manager.heap_count(MemoryType::Image, RequestClass::Small, 0), 1);
    }

    #[test]
    fn test_invalid_usage_is_rejected() {
        let (_host, mut manager) = manager();
        let reqs = MemoryRequirements::new(1024, 256, 0b1);
        assert_eq!(
            manager
                .allocate(MemoryType::Unknown, &reqs, MemoryPropertyFlags::empty())
                .unwrap_err(),
            MemoryError::InvalidUsage(MemoryType::Unknown)
        );
    }

    #[test]
    fn test_pool_grows_when_heaps_are_full() {
        let (host, mut manager) = manager();
        // The 32KB class holds 32 slots per slab heap
        let reqs = MemoryRequirements::new(32 * 1024, 256, 0b10);
        let blocks: Vec<_> = (0..33)
            .map(|_| {
                manager
                    .allocate_buffer_memory(&reqs, MemoryPropertyFlags::HOST_VISIBLE)
                    .unwrap()
            })
            .collect();

        assert_eq!(manager.heap_count(MemoryType::Buffer, RequestClass::Small, 1), 2);
        assert_eq!(host.live_objects(), 2);
        assert!(!blocks[0].heap().ptr_eq(blocks[32].heap()));
    }
}
