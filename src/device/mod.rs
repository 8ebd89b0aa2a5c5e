/*!
 * Device Interface
 *
 * The native graphics backend as seen by the allocator: a memory-type table, the
 * buffer/image granularity, and six opaque blocking operations. Everything above this
 * module treats the backend as a fixed-cost service with no inspectable state.
 */

mod host;

pub use host::{HostBinding, HostCounters, HostDevice};

use crate::core::errors::NativeResult;
use crate::core::types::{BufferHandle, DeviceSize, ImageHandle, MemoryHandle, TypeIndex};
use crate::memory::{MemoryError, MemoryResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

bitflags! {
    /// Property flags of a device memory type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MemoryPropertyFlags: u32 {
        const DEVICE_LOCAL = 0x0000_0001;
        const HOST_VISIBLE = 0x0000_0002;
        const HOST_COHERENT = 0x0000_0004;
        const HOST_CACHED = 0x0000_0008;
        const LAZILY_ALLOCATED = 0x0000_0010;
        const PROTECTED = 0x0000_0020;
    }
}

/// One entry of the device's memory-type table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTypeInfo {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

impl MemoryTypeInfo {
    pub fn new(property_flags: MemoryPropertyFlags, heap_index: u32) -> Self {
        Self {
            property_flags,
            heap_index,
        }
    }
}

/// Size, alignment and allowed memory types reported for a buffer or image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRequirements {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    /// Bit `i` set means memory type `i` may back the resource
    pub memory_type_bits: u32,
}

impl MemoryRequirements {
    pub fn new(size: DeviceSize, alignment: DeviceSize, memory_type_bits: u32) -> Self {
        Self {
            size,
            alignment,
            memory_type_bits,
        }
    }
}

/// Native memory operations consumed by the allocator.
///
/// Implementations are assumed atomic and blocking. Handles returned by
/// `allocate_memory` are owned by exactly one heap.
pub trait NativeDevice: Send + Sync {
    /// Memory-type table, indexed by type index
    fn memory_types(&self) -> Vec<MemoryTypeInfo>;

    /// Alignment separating linear buffers from optimal-tiling images
    fn buffer_image_granularity(&self) -> DeviceSize;

    fn allocate_memory(&self, type_index: TypeIndex, size: DeviceSize) -> NativeResult<MemoryHandle>;

    fn free_memory(&self, memory: MemoryHandle);

    /// Map `size` bytes starting at `offset`. The pointer stays valid until `unmap_memory`.
    fn map_memory(
        &self,
        memory: MemoryHandle,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> NativeResult<NonNull<u8>>;

    fn unmap_memory(&self, memory: MemoryHandle);

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    ) -> NativeResult<()>;

    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    ) -> NativeResult<()>;
}

/// Non-owning view of the device plus a shared liveness flag.
///
/// Every heap and block holds a clone; once `invalidate` is called on any clone,
/// all of them report `DeviceLost` instead of touching the backend.
#[derive(Clone)]
pub struct DeviceHandle {
    device: Arc<dyn NativeDevice>,
    alive: Arc<AtomicBool>,
}

impl DeviceHandle {
    pub fn new(device: Arc<dyn NativeDevice>) -> Self {
        Self {
            device,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Borrow the backend, failing if the device was torn down
    #[inline]
    pub fn get(&self) -> MemoryResult<&dyn NativeDevice> {
        if self.alive.load(Ordering::Acquire) {
            Ok(self.device.as_ref())
        } else {
            Err(MemoryError::DeviceLost)
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the device as torn down for every clone of this handle
    pub fn invalidate(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
