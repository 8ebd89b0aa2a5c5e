/*!
 * Heap Pools
 * Growable per-type-index collections of heaps sharing one strategy
 */

use crate::core::types::{DeviceSize, TypeIndex};
use crate::device::DeviceHandle;
use crate::memory::block::MemoryBlock;
use crate::memory::heap::HeapHandle;
use crate::memory::types::{HeapKind, MemoryError, MemoryResult, MemoryType, SlabClass};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How a pool builds a fresh heap
#[derive(Debug, Clone)]
pub(super) enum HeapTemplate {
    Slab(Vec<SlabClass>),
    Buddy {
        size: DeviceSize,
        min_subdivision: DeviceSize,
    },
}

impl HeapTemplate {
    fn kind(&self) -> HeapKind {
        match self {
            HeapTemplate::Slab(_) => HeapKind::Slab,
            HeapTemplate::Buddy { .. } => HeapKind::Buddy,
        }
    }

    fn create(&self, device: &DeviceHandle, type_index: TypeIndex) -> MemoryResult<HeapHandle> {
        match self {
            HeapTemplate::Slab(classes) => HeapHandle::slab(device, type_index, classes),
            HeapTemplate::Buddy {
                size,
                min_subdivision,
            } => HeapHandle::buddy(device, type_index, *min_subdivision, *size),
        }
    }
}

/// Outcome of collecting one pool
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Collected {
    pub heaps_released: usize,
    pub bytes_released: DeviceSize,
    pub heaps_retained: usize,
}

#[derive(Debug)]
pub(super) struct HeapPool {
    name: &'static str,
    template: HeapTemplate,
    heaps: BTreeMap<TypeIndex, Vec<HeapHandle>>,
}

impl HeapPool {
    pub(super) fn new(name: &'static str, template: HeapTemplate) -> Self {
        Self {
            name,
            template,
            heaps: BTreeMap::new(),
        }
    }

    /// First fit over existing heaps of `type_index`, then one fresh heap
    pub(super) fn allocate(
        &mut self,
        device: &DeviceHandle,
        type_index: TypeIndex,
        usage: MemoryType,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> MemoryResult<MemoryBlock> {
        let name = self.name;
        let heaps = self.heaps.entry(type_index).or_default();
        heaps.retain(|heap| {
            let released = heap.is_released();
            if released {
                debug!(pool = name, type_index, "Dropping heap released outside the pool");
            }
            !released
        });

        for heap in heaps.iter() {
            match heap.allocate(usage, size, alignment) {
                Ok(block) => return Ok(block),
                Err(e) if e.is_out_of_memory() => continue,
                Err(e) => return Err(e),
            }
        }

        let heap = self.template.create(device, type_index)?;
        heaps.push(heap.clone());
        info!(
            pool = self.name,
            type_index,
            heaps = heaps.len(),
            "Pool grown"
        );

        heap.allocate(usage, size, alignment).map_err(|e| {
            if e.is_out_of_memory() {
                warn!(pool = self.name, size, alignment, "Fresh heap rejected request");
                MemoryError::Misconfigured {
                    requested: size,
                    strategy: self.template.kind(),
                }
            } else {
                e
            }
        })
    }

    /// Release and drop every empty heap, and forget heaps already released elsewhere
    pub(super) fn collect(&mut self) -> Collected {
        let mut collected = Collected::default();
        let name = self.name;

        for heaps in self.heaps.values_mut() {
            heaps.retain(|heap| {
                if heap.is_released() {
                    return false;
                }
                if !heap.is_empty() {
                    collected.heaps_retained += 1;
                    return true;
                }

                let bytes = heap.footprint();
                match heap.release() {
                    Ok(()) => {
                        collected.heaps_released += 1;
                        collected.bytes_released += bytes;
                        false
                    }
                    Err(e) => {
                        warn!(pool = name, error = %e, "Empty heap could not be released");
                        collected.heaps_retained += 1;
                        true
                    }
                }
            });
        }
        self.heaps.retain(|_, heaps| !heaps.is_empty());

        debug!(
            pool = name,
            released = collected.heaps_released,
            retained = collected.heaps_retained,
            "Pool collected"
        );
        collected
    }

    /// Release every heap and clear the pool. Returns the first hard failure.
    pub(super) fn release_all(&mut self) -> MemoryResult<()> {
        let mut first_error = None;

        for heap in self.heaps.values().flatten() {
            match heap.release() {
                Ok(()) => {}
                Err(MemoryError::StillMapped(count)) => {
                    // The last block to drop tears the heap down
                    warn!(pool = self.name, mappings = count, "Heap still mapped at release");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        self.heaps.clear();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(super) fn heaps(&self) -> impl Iterator<Item = &HeapHandle> {
        self.heaps.values().flatten()
    }

    pub(super) fn heap_count(&self, type_index: TypeIndex) -> usize {
        self.heaps.get(&type_index).map_or(0, Vec::len)
    }
}
