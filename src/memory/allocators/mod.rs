/*!
 * Allocation Strategies
 *
 * - **Buddy**: binary tree with lazy coalescing, for standard-size requests
 * - **Slab**: fixed-size slots, for small requests
 * - **Linear**: bump pointer, reclaimed only with the heap
 * - **Stack**: bump-down pointer with push/pop frames
 * - **Unique**: one dedicated native object per request, for large requests
 */

mod buddy;
mod linear;
mod slab;
mod stack;
mod unique;

pub use buddy::BuddyAllocator;
pub use linear::LinearAllocator;
pub use slab::SlabAllocator;
pub use stack::StackAllocator;
pub use unique::UniqueAllocator;
