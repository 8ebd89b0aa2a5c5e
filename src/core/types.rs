/*!
 * Core Types
 * Common types used across the allocator
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size or offset inside a native memory object, in bytes
pub type DeviceSize = u64;

/// Index into the device's memory-type table
pub type TypeIndex = u32;

/// Opaque handle to a native memory object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryHandle(pub u64);

/// Opaque handle to a buffer resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferHandle(pub u64);

/// Opaque handle to an image resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(pub u64);

impl fmt::Display for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mem:0x{:x}", self.0)
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "buf:0x{:x}", self.0)
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "img:0x{:x}", self.0)
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two).
/// Returns `None` on overflow.
#[inline]
pub fn align_up(value: DeviceSize, alignment: DeviceSize) -> Option<DeviceSize> {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    Some(value.checked_add(mask)? & !mask)
}

/// Round `value` down to a multiple of `alignment` (a power of two)
#[inline]
pub fn align_down(value: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_up(0, 256), Some(0));
        assert_eq!(align_up(1, 256), Some(256));
        assert_eq!(align_up(512, 256), Some(512));
        assert_eq!(align_up(u64::MAX, 2), None);
        assert_eq!(align_down(511, 256), 256);
        assert_eq!(align_down(4095, 1), 4095);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(MemoryHandle(0x1f).to_string(), "mem:0x1f");
        assert_eq!(BufferHandle(2).to_string(), "buf:0x2");
        assert_eq!(ImageHandle(3).to_string(), "img:0x3");
    }
}
