/*!
 * GPU Heap Library
 * Device-memory sub-allocation over coarse native allocate/map primitives
 */

pub mod core;
pub mod device;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{ConfigError, NativeError, NativeResult};
pub use crate::core::types::{BufferHandle, DeviceSize, ImageHandle, MemoryHandle, TypeIndex};
pub use device::{
    DeviceHandle, HostDevice, MemoryPropertyFlags, MemoryRequirements, MemoryTypeInfo, NativeDevice,
};
pub use memory::{
    GcStats, HeapHandle, HeapKind, HeapStats, ManagerConfig, ManagerStats, MappedMemory,
    MemoryBlock, MemoryError, MemoryManager, MemoryResult, MemoryType, RequestClass, SlabClass,
    StackPop,
};
pub use monitoring::init_tracing;
