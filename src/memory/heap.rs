/*!
 * Heaps
 *
 * A heap owns exactly one native memory object (the unique strategy owns one per
 * allocation), the bookkeeping of one strategy, and a cached mapping. Mapping is
 * reference counted: the first map hits the backend, nested maps reuse the cached
 * pointer, and the backend unmap happens when the count drops back to zero.
 */

use super::allocators::{
    BuddyAllocator, LinearAllocator, SlabAllocator, StackAllocator, UniqueAllocator,
};
use super::block::MemoryBlock;
use super::traits::{check_alignment, SubAllocator};
use super::types::{
    Allocation, BlockSlot, HeapKind, HeapStats, MemoryError, MemoryResult, MemoryType, SlabClass,
};
use crate::core::types::{BufferHandle, DeviceSize, ImageHandle, MemoryHandle, TypeIndex};
use crate::device::{DeviceHandle, NativeDevice};
use parking_lot::Mutex;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Base pointer of a live native mapping
#[derive(Debug, Clone, Copy)]
struct MappedPtr(NonNull<u8>);

// SAFETY: the pointer is plain address data; it is only dereferenced through a
// `MappedMemory` guard, which keeps the owning block (and so the heap) alive.
unsafe impl Send for MappedPtr {}

/// Reference-counted native mapping of one memory object
#[derive(Debug, Default)]
pub(crate) struct MappingCache {
    base: Option<MappedPtr>,
    count: u32,
}

impl MappingCache {
    pub(crate) fn map(
        &mut self,
        device: &dyn NativeDevice,
        memory: MemoryHandle,
        size: DeviceSize,
    ) -> MemoryResult<NonNull<u8>> {
        let base = match self.base {
            Some(MappedPtr(ptr)) => ptr,
            None => {
                let ptr = device.map_memory(memory, 0, size)?;
                debug!(%memory, size, "Native object mapped");
                self.base = Some(MappedPtr(ptr));
                ptr
            }
        };
        self.count += 1;
        Ok(base)
    }

    pub(crate) fn unmap(&mut self, device: &dyn NativeDevice, memory: MemoryHandle) -> MemoryResult<()> {
        if self.count == 0 {
            warn!(%memory, "Unmap without a matching map");
            return Err(MemoryError::NotMapped);
        }

        self.count -= 1;
        if self.count == 0 {
            self.base = None;
            device.unmap_memory(memory);
            debug!(%memory, "Native object unmapped");
        }
        Ok(())
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }
}

/// The closed set of strategies a heap can run
#[derive(Debug)]
enum Strategy {
    Buddy(BuddyAllocator),
    Slab(SlabAllocator),
    Linear(LinearAllocator),
    Stack(StackAllocator),
    Unique(UniqueAllocator),
}

impl Strategy {
    fn kind(&self) -> HeapKind {
        match self {
            Strategy::Buddy(_) => HeapKind::Buddy,
            Strategy::Slab(_) => HeapKind::Slab,
            Strategy::Linear(_) => HeapKind::Linear,
            Strategy::Stack(_) => HeapKind::Stack,
            Strategy::Unique(_) => HeapKind::Unique,
        }
    }

    /// Range bookkeeping for strategies that sub-allocate one native object
    fn sub_allocator(&mut self) -> Option<&mut dyn SubAllocator> {
        match self {
            Strategy::Buddy(a) => Some(a),
            Strategy::Slab(a) => Some(a),
            Strategy::Linear(a) => Some(a),
            Strategy::Stack(a) => Some(a),
            Strategy::Unique(_) => None,
        }
    }

    fn allocate(
        &mut self,
        device: &dyn NativeDevice,
        usage: MemoryType,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<Allocation> {
        match self {
            Strategy::Buddy(a) => a.allocate(usage, size, alignment),
            Strategy::Slab(a) => a.allocate(usage, size, alignment),
            Strategy::Linear(a) => a.allocate(usage, size, alignment),
            Strategy::Stack(a) => a.allocate(usage, size, alignment),
            Strategy::Unique(a) => a.allocate(device, usage, size, alignment),
        }
    }

    fn free(&mut self, device: &dyn NativeDevice, slot: BlockSlot) -> MemoryResult<()> {
        match (self, slot) {
            (Strategy::Unique(a), BlockSlot::Unique(memory)) => a.free(device, memory),
            (Strategy::Unique(_), other) => Err(MemoryError::UseAfterFree(format!(
                "{:?} does not belong to a unique heap",
                other
            ))),
            (Strategy::Buddy(a), slot) => a.free(slot),
            (Strategy::Slab(a), slot) => a.free(slot),
            (Strategy::Linear(a), slot) => a.free(slot),
            (Strategy::Stack(a), slot) => a.free(slot),
        }
    }

    fn is_empty(&mut self) -> bool {
        match self {
            Strategy::Unique(a) => a.is_empty(),
            other => other.sub_allocator().map_or(true, |sub| sub.is_empty()),
        }
    }

    fn live_allocations(&mut self) -> usize {
        match self {
            Strategy::Unique(a) => a.len(),
            other => other.sub_allocator().map_or(0, |sub| sub.live_allocations()),
        }
    }
}

/// Result of popping a stack heap frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPop {
    /// A frame was restored; the pointer is back at this position
    Restored(DeviceSize),
    /// There was no frame: the heap released its native memory and is unusable
    Released,
}

/// Heap state; always accessed through a `HeapHandle`
#[derive(Debug)]
pub struct Heap {
    device: DeviceHandle,
    type_index: TypeIndex,
    size: DeviceSize,
    memory: Option<MemoryHandle>,
    mapping: MappingCache,
    strategy: Strategy,
    released: bool,
}

impl Heap {
    fn create(
        device: &DeviceHandle,
        type_index: TypeIndex,
        mut strategy: Strategy,
    ) -> MemoryResult<Self> {
        let native = device.get()?;
        let kind = strategy.kind();
        let size = strategy.sub_allocator().map_or(0, |sub| sub.capacity());
        let memory = match strategy {
            Strategy::Unique(_) => None,
            _ => Some(native.allocate_memory(type_index, size)?),
        };

        info!(%kind, type_index, size, "Heap created");
        Ok(Self {
            device: device.clone(),
            type_index,
            size,
            memory,
            mapping: MappingCache::default(),
            strategy,
            released: false,
        })
    }

    fn check_live(&self) -> MemoryResult<()> {
        if self.released {
            return Err(MemoryError::UseAfterFree(format!(
                "{} heap for memory type {} was released",
                self.strategy.kind(),
                self.type_index
            )));
        }
        Ok(())
    }

    fn allocate(
        &mut self,
        usage: MemoryType,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<(Allocation, MemoryHandle)> {
        self.check_live()?;
        let device = self.device.get()?;
        if !matches!(usage, MemoryType::Buffer | MemoryType::Image) {
            return Err(MemoryError::InvalidUsage(usage));
        }
        check_alignment(alignment)?;

        let allocation = self.strategy.allocate(device, usage, size, alignment)?;
        let memory = match (allocation.slot, self.memory) {
            (BlockSlot::Unique(memory), _) => memory,
            (_, Some(memory)) => memory,
            (_, None) => return Err(MemoryError::UseAfterFree("heap has no native object".into())),
        };
        Ok((allocation, memory))
    }

    fn free(&mut self, slot: BlockSlot) -> MemoryResult<()> {
        self.check_live()?;
        let device = self.device.get()?;
        self.strategy.free(device, slot)
    }

    fn map(&mut self, memory: MemoryHandle) -> MemoryResult<NonNull<u8>> {
        self.check_live()?;
        let device = self.device.get()?;
        match &mut self.strategy {
            Strategy::Unique(unique) => unique.map(device, memory),
            _ if self.memory == Some(memory) => self.mapping.map(device, memory, self.size),
            _ => Err(MemoryError::UseAfterFree(format!("{} is not owned by this heap", memory))),
        }
    }

    fn unmap(&mut self, memory: MemoryHandle) -> MemoryResult<()> {
        self.check_live()?;
        let device = self.device.get()?;
        match &mut self.strategy {
            Strategy::Unique(unique) => unique.unmap(device, memory),
            _ if self.memory == Some(memory) => self.mapping.unmap(device, memory),
            _ => Err(MemoryError::UseAfterFree(format!("{} is not owned by this heap", memory))),
        }
    }

    fn map_count(&self) -> u32 {
        match &self.strategy {
            Strategy::Unique(unique) => unique.map_count(),
            _ => self.mapping.count(),
        }
    }

    /// Free the native memory. Idempotent; refused while mappings are outstanding.
    fn release(&mut self) -> MemoryResult<()> {
        if self.released {
            return Ok(());
        }
        let device = self.device.get()?;

        let mappings = self.map_count();
        if mappings > 0 {
            return Err(MemoryError::StillMapped(mappings));
        }

        match &mut self.strategy {
            Strategy::Unique(unique) => {
                let released = unique.release_all(device)?;
                debug!(released, "Dedicated objects released");
            }
            _ => {
                if let Some(memory) = self.memory.take() {
                    device.free_memory(memory);
                }
            }
        }

        self.released = true;
        info!(
            kind = %self.strategy.kind(),
            type_index = self.type_index,
            size = self.size,
            "Heap released"
        );
        Ok(())
    }

    fn footprint(&self) -> DeviceSize {
        match &self.strategy {
            Strategy::Unique(unique) => unique.total_bytes(),
            _ => self.size,
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.released || !self.device.is_alive() {
            return;
        }
        if let Err(e) = self.release() {
            warn!(error = %e, "Heap dropped without release");
        }
    }
}

/// Shared handle to a heap.
///
/// The manager's pools and every block carved from the heap hold clones. Calls are
/// serialized by an internal mutex; no operation blocks on anything but the backend.
#[derive(Clone)]
pub struct HeapHandle {
    inner: Arc<Mutex<Heap>>,
    kind: HeapKind,
    type_index: TypeIndex,
}

impl HeapHandle {
    fn wrap(heap: Heap) -> Self {
        Self {
            kind: heap.strategy.kind(),
            type_index: heap.type_index,
            inner: Arc::new(Mutex::new(heap)),
        }
    }

    /// Buddy heap of `size` bytes that never splits below `min_subdivision`
    pub fn buddy(
        device: &DeviceHandle,
        type_index: TypeIndex,
        min_subdivision: DeviceSize,
        size: DeviceSize,
    ) -> MemoryResult<Self> {
        let strategy = Strategy::Buddy(BuddyAllocator::new(size, min_subdivision));
        Heap::create(device, type_index, strategy).map(Self::wrap)
    }

    /// Slab heap sized to hold every slot of `classes`
    pub fn slab(device: &DeviceHandle, type_index: TypeIndex, classes: &[SlabClass]) -> MemoryResult<Self> {
        let strategy = Strategy::Slab(SlabAllocator::new(classes));
        Heap::create(device, type_index, strategy).map(Self::wrap)
    }

    pub fn linear(device: &DeviceHandle, type_index: TypeIndex, size: DeviceSize) -> MemoryResult<Self> {
        let granularity = device.get()?.buffer_image_granularity();
        let strategy = Strategy::Linear(LinearAllocator::new(size, granularity));
        Heap::create(device, type_index, strategy).map(Self::wrap)
    }

    pub fn stack(device: &DeviceHandle, type_index: TypeIndex, size: DeviceSize) -> MemoryResult<Self> {
        let granularity = device.get()?.buffer_image_granularity();
        let strategy = Strategy::Stack(StackAllocator::new(size, granularity));
        Heap::create(device, type_index, strategy).map(Self::wrap)
    }

    /// Heap that allocates one native object per request
    pub fn unique(device: &DeviceHandle, type_index: TypeIndex) -> MemoryResult<Self> {
        let strategy = Strategy::Unique(UniqueAllocator::new(type_index));
        Heap::create(device, type_index, strategy).map(Self::wrap)
    }

    pub fn allocate(
        &self,
        usage: MemoryType,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<MemoryBlock> {
        let (allocation, memory) = self.inner.lock().allocate(usage, size, alignment)?;
        debug!(
            kind = %self.kind,
            type_index = self.type_index,
            offset = allocation.offset,
            size = allocation.size,
            %usage,
            "Block allocated"
        );
        Ok(MemoryBlock::new(self.clone(), allocation, memory, usage))
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn type_index(&self) -> TypeIndex {
        self.type_index
    }

    /// Native size of the heap (zero for unique heaps)
    pub fn size(&self) -> DeviceSize {
        self.inner.lock().size
    }

    /// Native bytes currently held by the heap
    pub fn footprint(&self) -> DeviceSize {
        let heap = self.inner.lock();
        if heap.released {
            0
        } else {
            heap.footprint()
        }
    }

    /// The heap's native object (`None` for unique heaps and after release)
    pub fn memory(&self) -> Option<MemoryHandle> {
        self.inner.lock().memory
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().strategy.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }

    pub fn map_count(&self) -> u32 {
        self.inner.lock().map_count()
    }

    pub fn release(&self) -> MemoryResult<()> {
        self.inner.lock().release()
    }

    /// Save the stack pointer (stack heaps only)
    pub fn push(&self) -> MemoryResult<()> {
        let mut heap = self.inner.lock();
        heap.check_live()?;
        match &mut heap.strategy {
            Strategy::Stack(stack) => stack.push(),
            other => Err(MemoryError::UnsupportedOperation {
                operation: "push".into(),
                strategy: other.kind(),
            }),
        }
    }

    /// Restore the last saved stack pointer, or release the heap at depth zero
    pub fn pop(&self) -> MemoryResult<StackPop> {
        let mut heap = self.inner.lock();
        heap.check_live()?;
        let restored = match &mut heap.strategy {
            Strategy::Stack(stack) => stack.pop(),
            other => {
                return Err(MemoryError::UnsupportedOperation {
                    operation: "pop".into(),
                    strategy: other.kind(),
                })
            }
        };

        match restored {
            Some(pointer) => Ok(StackPop::Restored(pointer)),
            None => {
                heap.release()?;
                Ok(StackPop::Released)
            }
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut heap = self.inner.lock();
        HeapStats {
            kind: self.kind,
            type_index: self.type_index,
            size: heap.footprint(),
            allocations: heap.strategy.live_allocations(),
            map_count: heap.map_count(),
            released: heap.released,
        }
    }

    pub fn ptr_eq(&self, other: &HeapHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn free_block(&self, slot: BlockSlot) -> MemoryResult<()> {
        self.inner.lock().free(slot)
    }

    /// Map the native object holding `memory`; returns the object's base pointer
    pub(crate) fn map_object(&self, memory: MemoryHandle) -> MemoryResult<NonNull<u8>> {
        self.inner.lock().map(memory)
    }

    pub(crate) fn unmap_object(&self, memory: MemoryHandle) -> MemoryResult<()> {
        self.inner.lock().unmap(memory)
    }

    pub(crate) fn bind_buffer(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    ) -> MemoryResult<()> {
        let heap = self.inner.lock();
        heap.check_live()?;
        heap.device.get()?.bind_buffer_memory(buffer, memory, offset)?;
        Ok(())
    }

    pub(crate) fn bind_image(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    ) -> MemoryResult<()> {
        let heap = self.inner.lock();
        heap.check_live()?;
        heap.device.get()?.bind_image_memory(image, memory, offset)?;
        Ok(())
    }
}

impl fmt::Debug for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HeapHandle")
            .field("kind", &self.kind)
            .field("type_index", &self.type_index)
            .finish_non_exhaustive()
    }
}
