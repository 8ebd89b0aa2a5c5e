/*!
 * Memory Types
 * Common types for heap management
 */

use crate::core::errors::{ConfigError, NativeError};
use crate::core::types::{DeviceSize, MemoryHandle, TypeIndex};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory operation result
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Memory errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum MemoryError {
    #[error("Out of memory: {strategy} heap cannot fit {requested} bytes (alignment {alignment})")]
    #[diagnostic(
        code(memory::out_of_memory),
        help("The heap is full. Pools recover by trying the next heap or growing.")
    )]
    OutOfMemory {
        requested: DeviceSize,
        alignment: DeviceSize,
        strategy: HeapKind,
    },

    #[error("No memory type matches type bits 0b{type_bits:b} with required flags 0x{required:x}")]
    #[diagnostic(
        code(memory::unsupported_memory_type),
        help("The resource cannot live in memory with the requested properties.")
    )]
    UnsupportedMemoryType { type_bits: u32, required: u32 },

    #[error("A fresh {strategy} heap could not serve {requested} bytes")]
    #[diagnostic(
        code(memory::misconfigured),
        help("Size classification routed the request to a heap that can never hold it. Check ManagerConfig.")
    )]
    Misconfigured {
        requested: DeviceSize,
        strategy: HeapKind,
    },

    #[error("Usage {0} cannot be requested")]
    #[diagnostic(code(memory::invalid_usage), help("Request BUFFER or IMAGE memory."))]
    InvalidUsage(MemoryType),

    #[error("Alignment {0} is not a non-zero power of two")]
    #[diagnostic(code(memory::invalid_alignment))]
    InvalidAlignment(DeviceSize),

    #[error("Device was lost")]
    #[diagnostic(
        code(memory::device_lost),
        help("The owning device was torn down; its heaps and blocks are no longer usable.")
    )]
    DeviceLost,

    #[error("Use after free: {0}")]
    #[diagnostic(code(memory::use_after_free))]
    UseAfterFree(String),

    #[error("Heap still has {0} outstanding mapping(s)")]
    #[diagnostic(code(memory::still_mapped), help("Drop every mapping guard before releasing."))]
    StillMapped(u32),

    #[error("Unmap without a matching map")]
    #[diagnostic(code(memory::not_mapped))]
    NotMapped,

    #[error("Stack heap frame depth {0} exceeded")]
    #[diagnostic(code(memory::stack_overflow))]
    StackOverflow(usize),

    #[error("Operation '{operation}' is not supported by {strategy} heaps")]
    #[diagnostic(code(memory::unsupported_operation))]
    UnsupportedOperation {
        operation: String,
        strategy: HeapKind,
    },

    #[error("Native backend failure: {0}")]
    #[diagnostic(code(memory::native))]
    Native(#[from] NativeError),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(memory::config))]
    Config(#[from] ConfigError),
}

impl MemoryError {
    /// Whether trying another heap may succeed
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, MemoryError::OutOfMemory { .. })
    }
}

/// Usage class of an allocation, and occupancy state of a heap region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    #[default]
    Free,
    Image,
    Buffer,
    Unknown,
}

impl MemoryType {
    /// Whether placing `neighbor` next to `self` needs buffer/image granularity padding
    pub fn conflicts(self, neighbor: MemoryType) -> bool {
        match (self, neighbor) {
            (MemoryType::Unknown, _) | (_, MemoryType::Unknown) => true,
            (a, b) if a == b => false,
            (a, b) => a != MemoryType::Free && b != MemoryType::Free,
        }
    }

    pub fn is_free(self) -> bool {
        self == MemoryType::Free
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MemoryType::Free => write!(f, "FREE"),
            MemoryType::Image => write!(f, "IMAGE"),
            MemoryType::Buffer => write!(f, "BUFFER"),
            MemoryType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// The closed set of allocation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapKind {
    Buddy,
    Slab,
    Linear,
    Stack,
    Unique,
}

impl std::fmt::Display for HeapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            HeapKind::Buddy => write!(f, "buddy"),
            HeapKind::Slab => write!(f, "slab"),
            HeapKind::Linear => write!(f, "linear"),
            HeapKind::Stack => write!(f, "stack"),
            HeapKind::Unique => write!(f, "unique"),
        }
    }
}

/// One slab size class: `count` slots of `size` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlabClass {
    pub size: DeviceSize,
    pub count: u32,
}

impl SlabClass {
    pub const fn new(size: DeviceSize, count: u32) -> Self {
        Self { size, count }
    }

    pub fn total(&self) -> DeviceSize {
        self.size * self.count as DeviceSize
    }
}

/// Where a block lives inside its heap's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSlot {
    Buddy { node: usize, generation: u32 },
    Slab { class: usize, slot: usize, generation: u32 },
    Linear,
    Stack,
    Unique(MemoryHandle),
}

/// A region carved by a strategy, before it is wrapped into a `MemoryBlock`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub slot: BlockSlot,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// Snapshot of a heap's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapStats {
    pub kind: HeapKind,
    pub type_index: TypeIndex,
    pub size: DeviceSize,
    pub allocations: usize,
    pub map_count: u32,
    pub released: bool,
}
