/*!
 * Memory Traits
 * Bookkeeping interface shared by the sub-allocating strategies
 */

use super::types::*;
use crate::core::types::DeviceSize;

/// Range bookkeeping over one native memory object.
///
/// Implementors never touch the device: they only decide which byte range of the
/// object a request occupies. `Heap` owns the native object and wraps the result.
pub trait SubAllocator {
    /// Strategy tag used in errors and statistics
    fn kind(&self) -> HeapKind;

    /// Bytes managed by this allocator
    fn capacity(&self) -> DeviceSize;

    /// Carve a region for `usage` of at least `size` bytes aligned to `alignment`
    fn allocate(
        &mut self,
        usage: MemoryType,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<Allocation>;

    /// Return a region previously handed out by `allocate`
    fn free(&mut self, slot: BlockSlot) -> MemoryResult<()>;

    /// Whether no region is currently handed out
    fn is_empty(&mut self) -> bool;

    /// Number of regions currently handed out
    fn live_allocations(&self) -> usize;
}

/// Reject alignments the mask arithmetic cannot handle
#[inline]
pub(crate) fn check_alignment(alignment: DeviceSize) -> MemoryResult<()> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(MemoryError::InvalidAlignment(alignment))
    }
}
