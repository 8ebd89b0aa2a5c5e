/*!
 * Allocator Limits and Defaults
 *
 * Centralized location for the routing thresholds, heap sizes and structural limits.
 * Every value here is a default; `ManagerConfig` overrides the routing ones at construction.
 */

use crate::core::types::DeviceSize;

// =============================================================================
// ROUTING THRESHOLDS
// =============================================================================

const KIB: DeviceSize = 1024;
const MIB: DeviceSize = 1024 * KIB;

/// Requests strictly above this size get a dedicated native object (128MB)
pub const LARGE_ALLOC_THRESHOLD: DeviceSize = 128 * MIB;

/// Requests at or below this size are served from slab heaps (32KB)
pub const SMALL_ALLOC_THRESHOLD: DeviceSize = 32 * KIB;

// =============================================================================
// STANDARD (BUDDY) HEAPS
// =============================================================================

/// Native size of each standard buffer heap (128MB)
pub const STANDARD_BUFFER_HEAP_SIZE: DeviceSize = 128 * MIB;

/// Native size of each standard image heap (256MB)
pub const STANDARD_IMAGE_HEAP_SIZE: DeviceSize = 256 * MIB;

/// Buddy nodes are never split below this size for buffers (4KB)
pub const MINIMUM_BUFFER_SUBDIV_SIZE: DeviceSize = 4 * KIB;

/// Buddy nodes are never split below this size for images (4KB)
pub const MINIMUM_IMAGE_SUBDIV_SIZE: DeviceSize = 4 * KIB;

// =============================================================================
// SMALL (SLAB) HEAPS
// =============================================================================

/// Slot size / slot count per slab class, ascending.
/// Each class occupies 1MB, so one small heap is 4MB.
pub const SMALL_HEAP_CLASSES: [(DeviceSize, u32); 4] = [
    (4 * KIB, 256),
    (8 * KIB, 128),
    (16 * KIB, 64),
    (32 * KIB, 32),
];

// =============================================================================
// STRUCTURAL LIMITS
// =============================================================================

/// Maximum nesting depth of stack heap frames
pub const MAX_STACK_FRAMES: usize = 8;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "GPU_HEAP_";
