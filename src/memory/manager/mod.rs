/*!
 * Memory Manager
 *
 * Routes each request to a strategy by size and usage:
 *
 * - **Large** (> large threshold): one dedicated native object per request,
 *   tracked by a unique heap per memory type
 * - **Small** (<= small threshold): slab heaps with fixed size classes
 * - **Standard** (everything in between): buddy heaps
 *
 * Buffers and images never share a heap. Pools grow lazily, one heap at a time, and
 * `garbage_collect` releases heaps that became empty.
 */

mod allocator;
mod config;
mod gc;
mod pool;

pub use config::ManagerConfig;
pub use gc::GcStats;

use crate::core::types::{DeviceSize, TypeIndex};
use crate::device::{DeviceHandle, MemoryPropertyFlags, MemoryTypeInfo};
use crate::memory::heap::HeapHandle;
use crate::memory::types::{HeapStats, MemoryError, MemoryResult, MemoryType};
use pool::{HeapPool, HeapTemplate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Size class a request is routed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    Large,
    Standard,
    Small,
}

/// Snapshot of every heap the manager holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerStats {
    pub heaps: Vec<HeapStats>,
    pub heap_count: usize,
    pub native_bytes: DeviceSize,
    pub live_allocations: usize,
}

pub struct MemoryManager {
    device: DeviceHandle,
    memory_types: Vec<MemoryTypeInfo>,
    config: ManagerConfig,
    large_buffer_heaps: BTreeMap<TypeIndex, HeapHandle>,
    large_image_heaps: BTreeMap<TypeIndex, HeapHandle>,
    small_buffer_pool: HeapPool,
    small_image_pool: HeapPool,
    standard_buffer_pool: HeapPool,
    standard_image_pool: HeapPool,
}

impl MemoryManager {
    pub fn new(device: DeviceHandle) -> MemoryResult<Self> {
        Self::with_config(device, ManagerConfig::default())
    }

    pub fn with_config(device: DeviceHandle, config: ManagerConfig) -> MemoryResult<Self> {
        config.validate()?;
        let memory_types = device.get()?.memory_types();

        info!(
            memory_types = memory_types.len(),
            large_threshold = config.large_alloc_threshold,
            small_threshold = config.small_alloc_threshold,
            "Memory manager initialized"
        );

        let slab = HeapTemplate::Slab(config.slab_classes.clone());
        Ok(Self {
            small_buffer_pool: HeapPool::new("small_buffer", slab.clone()),
            small_image_pool: HeapPool::new("small_image", slab),
            standard_buffer_pool: HeapPool::new(
                "standard_buffer",
                HeapTemplate::Buddy {
                    size: config.standard_buffer_heap_size,
                    min_subdivision: config.min_buffer_subdivision,
                },
            ),
            standard_image_pool: HeapPool::new(
                "standard_image",
                HeapTemplate::Buddy {
                    size: config.standard_image_heap_size,
                    min_subdivision: config.min_image_subdivision,
                },
            ),
            large_buffer_heaps: BTreeMap::new(),
            large_image_heaps: BTreeMap::new(),
            device,
            memory_types,
            config,
        })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn memory_types(&self) -> &[MemoryTypeInfo] {
        &self.memory_types
    }

    /// First memory type allowed by `type_bits` whose flags contain `required`
    pub fn select_memory_type_index(
        &self,
        type_bits: u32,
        required: MemoryPropertyFlags,
    ) -> MemoryResult<TypeIndex> {
        self.memory_types
            .iter()
            .enumerate()
            .take(32)
            .find(|(i, info)| type_bits & (1u32 << *i) != 0 && info.property_flags.contains(required))
            .map(|(i, _)| i as TypeIndex)
            .ok_or(MemoryError::UnsupportedMemoryType {
                type_bits,
                required: required.bits(),
            })
    }

    pub fn classify(&self, size: DeviceSize) -> RequestClass {
        if size > self.config.large_alloc_threshold {
            RequestClass::Large
        } else if size <= self.config.small_alloc_threshold {
            RequestClass::Small
        } else {
            RequestClass::Standard
        }
    }

    /// Every heap currently held, large heaps first
    pub fn heaps(&self) -> impl Iterator<Item = &HeapHandle> {
        self.large_buffer_heaps
            .values()
            .chain(self.large_image_heaps.values())
            .chain(self.small_buffer_pool.heaps())
            .chain(self.small_image_pool.heaps())
            .chain(self.standard_buffer_pool.heaps())
            .chain(self.standard_image_pool.heaps())
    }

    /// Number of pooled heaps serving `usage` requests of `class` in one memory type
    pub fn heap_count(&self, usage: MemoryType, class: RequestClass, type_index: TypeIndex) -> usize {
        match (usage, class) {
            (MemoryType::Buffer, RequestClass::Large) => {
                self.large_buffer_heaps.contains_key(&type_index) as usize
            }
            (MemoryType::Image, RequestClass::Large) => {
                self.large_image_heaps.contains_key(&type_index) as usize
            }
            (MemoryType::Buffer, RequestClass::Small) => self.small_buffer_pool.heap_count(type_index),
            (MemoryType::Image, RequestClass::Small) => self.small_image_pool.heap_count(type_index),
            (MemoryType::Buffer, RequestClass::Standard) => {
                self.standard_buffer_pool.heap_count(type_index)
            }
            (MemoryType::Image, RequestClass::Standard) => {
                self.standard_image_pool.heap_count(type_index)
            }
            _ => 0,
        }
    }

    pub fn stats(&self) -> ManagerStats {
        let heaps: Vec<HeapStats> = self.heaps().map(HeapHandle::stats).collect();
        ManagerStats {
            heap_count: heaps.len(),
            native_bytes: heaps.iter().map(|h| h.size).sum(),
            live_allocations: heaps.iter().map(|h| h.allocations).sum(),
            heaps,
        }
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("device", &self.device)
            .field("memory_types", &self.memory_types.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
