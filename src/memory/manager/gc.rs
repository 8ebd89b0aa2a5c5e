/*!
 * Memory Manager Garbage Collection
 * Releases empty pooled heaps and tears everything down on request
 */

use super::MemoryManager;
use crate::core::types::DeviceSize;
use crate::memory::types::{MemoryError, MemoryResult};
use crate::monitoring::span_operation;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Result of one garbage collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStats {
    pub heaps_released: usize,
    pub bytes_released: DeviceSize,
    pub heaps_retained: usize,
    pub duration_us: u64,
}

impl MemoryManager {
    /// Release every empty slab and buddy heap.
    /// Unique heaps are left alone; their objects are released per block.
    pub fn garbage_collect(&mut self) -> GcStats {
        let span = span_operation("garbage_collect");
        let _entered = span.enter();
        let start = Instant::now();
        let mut stats = GcStats::default();

        for pool in [
            &mut self.small_buffer_pool,
            &mut self.small_image_pool,
            &mut self.standard_buffer_pool,
            &mut self.standard_image_pool,
        ] {
            let collected = pool.collect();
            stats.heaps_released += collected.heaps_released;
            stats.bytes_released += collected.bytes_released;
            stats.heaps_retained += collected.heaps_retained;
        }

        stats.duration_us = start.elapsed().as_micros() as u64;
        span.record_heaps(stats.heaps_released);
        if stats.heaps_released > 0 {
            info!(
                heaps_released = stats.heaps_released,
                bytes_released = stats.bytes_released,
                heaps_retained = stats.heaps_retained,
                duration_us = stats.duration_us,
                "Garbage collection complete"
            );
        }
        stats
    }

    /// Release every heap, including unique heaps, and clear all bookkeeping.
    ///
    /// Blocks that outlive this call fail with `UseAfterFree`. Heaps that are still
    /// mapped are released by their last block instead.
    pub fn free_all(&mut self) -> MemoryResult<()> {
        let span = span_operation("free_all");
        let _entered = span.enter();
        span.record_heaps(self.heaps().count());
        let mut first_error: Option<MemoryError> = None;

        for heap in self
            .large_buffer_heaps
            .values()
            .chain(self.large_image_heaps.values())
        {
            match heap.release() {
                Ok(()) => {}
                Err(MemoryError::StillMapped(count)) => {
                    warn!(mappings = count, "Unique heap still mapped at release");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        self.large_buffer_heaps.clear();
        self.large_image_heaps.clear();

        for pool in [
            &mut self.small_buffer_pool,
            &mut self.small_image_pool,
            &mut self.standard_buffer_pool,
            &mut self.standard_image_pool,
        ] {
            if let Err(e) = pool.release_all() {
                first_error.get_or_insert(e);
            }
        }

        info!("All heaps released");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        if !self.device.is_alive() {
            return;
        }
        if let Err(e) = self.free_all() {
            warn!(error = %e, "Memory manager teardown failed");
        }
    }
}
