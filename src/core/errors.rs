/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::core::types::{DeviceSize, MemoryHandle, TypeIndex};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export MemoryError from memory module
pub use crate::memory::MemoryError;

/// Native backend result
pub type NativeResult<T> = Result<T, NativeError>;

/// Failures reported by the native device backend.
/// None of these are retried: they violate the backend contract.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum NativeError {
    #[error("Device memory exhausted: {size} bytes requested from memory type {type_index}")]
    #[diagnostic(
        code(native::out_of_device_memory),
        help("The device memory budget for this type is exhausted. Free or garbage-collect heaps.")
    )]
    OutOfDeviceMemory { type_index: TypeIndex, size: DeviceSize },

    #[error("Memory type index {0} does not exist on this device")]
    #[diagnostic(code(native::invalid_type_index))]
    InvalidTypeIndex(TypeIndex),

    #[error("Unknown or already released memory object {0}")]
    #[diagnostic(
        code(native::invalid_handle),
        help("The memory object was freed or never allocated by this device.")
    )]
    InvalidHandle(MemoryHandle),

    #[error("Failed to map {memory}: {reason}")]
    #[diagnostic(code(native::map_failed))]
    MapFailed { memory: MemoryHandle, reason: String },

    #[error("Failed to bind {memory} at offset {offset}: {reason}")]
    #[diagnostic(code(native::bind_failed))]
    BindFailed {
        memory: MemoryHandle,
        offset: DeviceSize,
        reason: String,
    },
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Small threshold {small} must be below large threshold {large}")]
    #[diagnostic(code(config::invalid_thresholds))]
    InvalidThresholds { small: DeviceSize, large: DeviceSize },

    #[error("Largest slab class {largest} cannot hold small requests up to {small_threshold} bytes")]
    #[diagnostic(
        code(config::slab_classes_too_small),
        help("Add a slab class at least as large as the small threshold.")
    )]
    SlabClassesTooSmall {
        largest: DeviceSize,
        small_threshold: DeviceSize,
    },

    #[error("Invalid slab class: slot size {size}, count {count}")]
    #[diagnostic(code(config::invalid_slab_class))]
    InvalidSlabClass { size: DeviceSize, count: u32 },

    #[error("Standard heap size {heap_size} cannot hold requests up to the large threshold {large_threshold}")]
    #[diagnostic(
        code(config::heap_too_small),
        help("Standard heaps must be at least as large as the large threshold.")
    )]
    HeapTooSmall {
        heap_size: DeviceSize,
        large_threshold: DeviceSize,
    },

    #[error("Minimum subdivision size {0} must be a non-zero power of two")]
    #[diagnostic(code(config::invalid_subdivision))]
    InvalidSubdivision(DeviceSize),

    #[error("Environment variable {var} has invalid value '{value}'")]
    #[diagnostic(code(config::invalid_env), help("Expected an unsigned byte count."))]
    InvalidEnv { var: String, value: String },

    #[error("Failed to parse configuration: {0}")]
    #[diagnostic(code(config::parse_failed))]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
