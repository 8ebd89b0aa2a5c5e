/*!
 * Memory Blocks
 *
 * A block is the caller's handle to one carved region. It keeps its heap alive, so a
 * block can be mapped, bound and freed without going back through the manager.
 */

use super::heap::HeapHandle;
use super::types::{Allocation, BlockSlot, HeapKind, MemoryResult, MemoryType};
use crate::core::errors::NativeError;
use crate::core::types::{BufferHandle, DeviceSize, ImageHandle, MemoryHandle, TypeIndex};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Region of a native memory object owned by a heap
pub struct MemoryBlock {
    heap: HeapHandle,
    slot: BlockSlot,
    memory: MemoryHandle,
    offset: DeviceSize,
    size: DeviceSize,
    usage: MemoryType,
}

impl MemoryBlock {
    pub(crate) fn new(
        heap: HeapHandle,
        allocation: Allocation,
        memory: MemoryHandle,
        usage: MemoryType,
    ) -> Self {
        Self {
            heap,
            slot: allocation.slot,
            memory,
            offset: allocation.offset,
            size: allocation.size,
            usage,
        }
    }

    /// Aligned offset inside the native object
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    /// Bytes from `offset` to the end of the carved region
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    pub fn memory(&self) -> MemoryHandle {
        self.memory
    }

    pub fn usage(&self) -> MemoryType {
        self.usage
    }

    pub fn kind(&self) -> HeapKind {
        self.heap.kind()
    }

    pub fn type_index(&self) -> TypeIndex {
        self.heap.type_index()
    }

    pub fn heap(&self) -> &HeapHandle {
        &self.heap
    }

    /// Map the block into host memory.
    ///
    /// Nested maps of blocks from the same heap share one native mapping; the guard
    /// unmaps when dropped.
    pub fn map(&mut self) -> MemoryResult<MappedMemory<'_>> {
        let base = self.heap.map_object(self.memory)?;

        let span = usize::try_from(self.offset)
            .ok()
            .zip(usize::try_from(self.size).ok());
        let (offset, len) = match span {
            Some(span) => span,
            None => {
                self.heap.unmap_object(self.memory)?;
                return Err(NativeError::MapFailed {
                    memory: self.memory,
                    reason: "block does not fit the host address space".into(),
                }
                .into());
            }
        };

        // SAFETY: the heap maps the whole native object and offset + size lies inside it
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
        debug!(memory = %self.memory, offset = self.offset, size = self.size, "Block mapped");
        Ok(MappedMemory {
            block: self,
            ptr,
            len,
        })
    }

    pub fn bind_to_buffer(&self, buffer: BufferHandle) -> MemoryResult<()> {
        self.heap.bind_buffer(buffer, self.memory, self.offset)?;
        debug!(%buffer, memory = %self.memory, offset = self.offset, "Buffer bound");
        Ok(())
    }

    pub fn bind_to_image(&self, image: ImageHandle) -> MemoryResult<()> {
        self.heap.bind_image(image, self.memory, self.offset)?;
        debug!(%image, memory = %self.memory, offset = self.offset, "Image bound");
        Ok(())
    }

    /// Return the region to its heap. Native memory stays with the heap except for
    /// unique blocks, whose dedicated object is released here.
    pub fn free(self) -> MemoryResult<()> {
        self.heap.free_block(self.slot)?;
        debug!(
            kind = %self.heap.kind(),
            memory = %self.memory,
            offset = self.offset,
            size = self.size,
            "Block freed"
        );
        Ok(())
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("kind", &self.heap.kind())
            .field("memory", &self.memory)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}

/// Host view of a mapped block; unmaps on drop
pub struct MappedMemory<'a> {
    block: &'a mut MemoryBlock,
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedMemory<'_> {
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Unmap now, reporting backend errors that `Drop` can only log
    pub fn unmap(self) -> MemoryResult<()> {
        let this = ManuallyDrop::new(self);
        this.block.heap.unmap_object(this.block.memory)
    }
}

impl Deref for MappedMemory<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr..ptr+len stays mapped while the guard lives, and the guard holds
        // the block's unique borrow
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for MappedMemory<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `deref`
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.block.heap.unmap_object(self.block.memory) {
            warn!(error = %e, memory = %self.block.memory, "Unmap on drop failed");
        }
    }
}

impl fmt::Debug for MappedMemory<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MappedMemory")
            .field("memory", &self.block.memory)
            .field("len", &self.len)
            .finish()
    }
}
