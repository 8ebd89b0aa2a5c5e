/*!
 * Memory Module
 * Heaps, allocation strategies, blocks and the routing manager
 */

pub mod allocators;
pub mod block;
pub mod heap;
pub mod manager;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use block::{MappedMemory, MemoryBlock};
pub use heap::{HeapHandle, StackPop};
pub use manager::{GcStats, ManagerConfig, ManagerStats, MemoryManager, RequestClass};
pub use traits::SubAllocator;
pub use types::*;
