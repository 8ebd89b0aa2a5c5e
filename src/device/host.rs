/*!
 * Host-Simulated Device
 *
 * A `NativeDevice` backed by process memory. Native objects get their backing bytes on
 * first map, so reserving large heaps costs nothing until they are written. Every native
 * call is counted so callers can observe how often the backend was actually hit.
 */

use super::{MemoryPropertyFlags, MemoryTypeInfo, NativeDevice};
use crate::core::errors::{NativeError, NativeResult};
use crate::core::types::{BufferHandle, DeviceSize, ImageHandle, MemoryHandle, TypeIndex};
use ahash::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Number of native calls issued against a `HostDevice`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCounters {
    pub allocations: u64,
    pub frees: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub binds: u64,
}

/// A recorded resource binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostBinding {
    Buffer {
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    },
    Image {
        image: ImageHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    },
}

#[derive(Debug)]
struct HostObject {
    type_index: TypeIndex,
    size: DeviceSize,
    bytes: Option<Box<[u8]>>,
    mapped: bool,
}

#[derive(Debug, Default)]
struct HostState {
    next_handle: u64,
    objects: HashMap<u64, HostObject>,
    used: HashMap<TypeIndex, DeviceSize>,
    counters: HostCounters,
    bindings: Vec<HostBinding>,
}

/// In-process device with a configurable memory-type table
#[derive(Debug)]
pub struct HostDevice {
    memory_types: Vec<MemoryTypeInfo>,
    granularity: DeviceSize,
    budgets: HashMap<TypeIndex, DeviceSize>,
    state: Mutex<HostState>,
}

impl HostDevice {
    pub fn new(memory_types: Vec<MemoryTypeInfo>, granularity: DeviceSize) -> Self {
        Self {
            memory_types,
            granularity: granularity.max(1),
            budgets: HashMap::default(),
            state: Mutex::new(HostState {
                next_handle: 1,
                ..HostState::default()
            }),
        }
    }

    /// Cap the total bytes that may be live in one memory type
    pub fn with_budget(mut self, type_index: TypeIndex, bytes: DeviceSize) -> Self {
        self.budgets.insert(type_index, bytes);
        self
    }

    pub fn counters(&self) -> HostCounters {
        self.state.lock().counters
    }

    /// Number of native objects currently allocated
    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Bytes currently allocated from one memory type
    pub fn used_bytes(&self, type_index: TypeIndex) -> DeviceSize {
        self.state.lock().used.get(&type_index).copied().unwrap_or(0)
    }

    pub fn is_live(&self, memory: MemoryHandle) -> bool {
        self.state.lock().objects.contains_key(&memory.0)
    }

    pub fn is_mapped(&self, memory: MemoryHandle) -> bool {
        self.state
            .lock()
            .objects
            .get(&memory.0)
            .map_or(false, |object| object.mapped)
    }

    pub fn bindings(&self) -> Vec<HostBinding> {
        self.state.lock().bindings.clone()
    }

    fn check_binding(state: &HostState, memory: MemoryHandle, offset: DeviceSize) -> NativeResult<()> {
        let object = state
            .objects
            .get(&memory.0)
            .ok_or(NativeError::InvalidHandle(memory))?;
        if offset >= object.size.max(1) {
            return Err(NativeError::BindFailed {
                memory,
                offset,
                reason: format!("offset beyond object size {}", object.size),
            });
        }
        Ok(())
    }
}

impl Default for HostDevice {
    /// Discrete-GPU-like layout: device-local, host-visible coherent, host-visible cached
    fn default() -> Self {
        Self::new(
            vec![
                MemoryTypeInfo::new(MemoryPropertyFlags::DEVICE_LOCAL, 0),
                MemoryTypeInfo::new(
                    MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                    1,
                ),
                MemoryTypeInfo::new(
                    MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT
                        | MemoryPropertyFlags::HOST_CACHED,
                    1,
                ),
            ],
            1024,
        )
    }
}

impl NativeDevice for HostDevice {
    fn memory_types(&self) -> Vec<MemoryTypeInfo> {
        self.memory_types.clone()
    }

    fn buffer_image_granularity(&self) -> DeviceSize {
        self.granularity
    }

    fn allocate_memory(&self, type_index: TypeIndex, size: DeviceSize) -> NativeResult<MemoryHandle> {
        if type_index as usize >= self.memory_types.len() {
            return Err(NativeError::InvalidTypeIndex(type_index));
        }

        let mut state = self.state.lock();
        let used = state.used.get(&type_index).copied().unwrap_or(0);
        if let Some(&budget) = self.budgets.get(&type_index) {
            if used.saturating_add(size) > budget {
                warn!(type_index, size, used, budget, "Host device budget exhausted");
                return Err(NativeError::OutOfDeviceMemory { type_index, size });
            }
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.objects.insert(
            handle,
            HostObject {
                type_index,
                size,
                bytes: None,
                mapped: false,
            },
        );
        state.used.insert(type_index, used + size);
        state.counters.allocations += 1;

        debug!(handle, type_index, size, "Host memory object allocated");
        Ok(MemoryHandle(handle))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        let mut state = self.state.lock();
        match state.objects.remove(&memory.0) {
            Some(object) => {
                if let Some(used) = state.used.get_mut(&object.type_index) {
                    *used = used.saturating_sub(object.size);
                }
                state.counters.frees += 1;
                debug!(handle = memory.0, size = object.size, "Host memory object freed");
            }
            None => warn!(%memory, "Free of unknown host memory object"),
        }
    }

    fn map_memory(
        &self,
        memory: MemoryHandle,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> NativeResult<NonNull<u8>> {
        let mut state = self.state.lock();
        let object = state
            .objects
            .get_mut(&memory.0)
            .ok_or(NativeError::InvalidHandle(memory))?;

        if object.mapped {
            return Err(NativeError::MapFailed {
                memory,
                reason: "object is already mapped".into(),
            });
        }
        match offset.checked_add(size) {
            Some(end) if end <= object.size => {}
            _ => {
                return Err(NativeError::MapFailed {
                    memory,
                    reason: format!(
                        "range {}+{} exceeds object size {}",
                        offset, size, object.size
                    ),
                })
            }
        }

        let total = usize::try_from(object.size).map_err(|_| NativeError::MapFailed {
            memory,
            reason: "object larger than host address space".into(),
        })?;
        let bytes = object
            .bytes
            .get_or_insert_with(|| vec![0u8; total].into_boxed_slice());
        let base = bytes[offset as usize..].as_mut_ptr();
        let ptr = NonNull::new(base).ok_or_else(|| NativeError::MapFailed {
            memory,
            reason: "null host pointer".into(),
        })?;

        object.mapped = true;
        state.counters.maps += 1;
        Ok(ptr)
    }

    fn unmap_memory(&self, memory: MemoryHandle) {
        let mut state = self.state.lock();
        let was_mapped = match state.objects.get_mut(&memory.0) {
            Some(object) if object.mapped => {
                object.mapped = false;
                true
            }
            _ => false,
        };

        if was_mapped {
            state.counters.unmaps += 1;
        } else {
            warn!(%memory, "Unmap of an object that is not mapped");
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    ) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_binding(&state, memory, offset)?;
        state.bindings.push(HostBinding::Buffer {
            buffer,
            memory,
            offset,
        });
        state.counters.binds += 1;
        Ok(())
    }

    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: DeviceSize,
    ) -> NativeResult<()> {
        let mut state = self.state.lock();
        Self::check_binding(&state, memory, offset)?;
        state.bindings.push(HostBinding::Image {
            image,
            memory,
            offset,
        });
        state.counters.binds += 1;
        Ok(())
    }
}
