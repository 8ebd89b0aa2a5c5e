/*!
 * GPU Heap Demo
 *
 * Drives the memory manager with a mixed per-frame workload against the host-simulated
 * device and prints the resulting statistics as JSON.
 */

use anyhow::{Context, Result};
use gpu_heap::{
    init_tracing, BufferHandle, DeviceHandle, HeapHandle, HostDevice, ImageHandle, ManagerConfig,
    MemoryManager, MemoryPropertyFlags, MemoryRequirements, MemoryType, StackPop,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

const FRAMES: u64 = 4;

#[derive(Serialize)]
struct Report {
    manager_after_frames: gpu_heap::ManagerStats,
    gc: gpu_heap::GcStats,
    manager_after_gc: gpu_heap::ManagerStats,
    host: gpu_heap::device::HostCounters,
}

fn main() -> Result<()> {
    init_tracing();
    info!("GPU heap demo starting");

    let host = Arc::new(HostDevice::default());
    let device = DeviceHandle::new(host.clone());
    let config = ManagerConfig::from_env().context("invalid GPU_HEAP_* configuration")?;
    let mut manager = MemoryManager::with_config(device.clone(), config)?;

    let mut persistent = Vec::new();
    let mut next_handle = 1u64;

    for frame in 0..FRAMES {
        let mut transient = Vec::new();

        // Uniform buffers, small and host visible
        for i in 0..16 {
            let reqs = MemoryRequirements::new(256 + i * 512, 256, 0b110);
            let mut block = manager
                .allocate_buffer_memory(&reqs, MemoryPropertyFlags::HOST_VISIBLE)
                .context("uniform buffer allocation")?;
            block.bind_to_buffer(BufferHandle(next_handle))?;
            next_handle += 1;
            {
                let mut view = block.map()?;
                view.fill(frame as u8);
            }
            transient.push(block);
        }

        // Render targets, standard size and device local
        for _ in 0..2 {
            let reqs = MemoryRequirements::new(8 << 20, 64 * 1024, 0b1);
            let block = manager
                .allocate_image_memory(&reqs, MemoryPropertyFlags::DEVICE_LOCAL)
                .context("render target allocation")?;
            block.bind_to_image(ImageHandle(next_handle))?;
            next_handle += 1;
            transient.push(block);
        }

        // One long-lived vertex buffer per frame
        let reqs = MemoryRequirements::new(1 << 20, 256, 0b1);
        persistent.push(manager.allocate_buffer_memory(&reqs, MemoryPropertyFlags::DEVICE_LOCAL)?);

        info!(frame, transient = transient.len(), "Frame submitted");
        for block in transient {
            block.free()?;
        }
    }

    // A texture atlas larger than the large threshold
    let atlas_size = manager.config().large_alloc_threshold + 1;
    let atlas = manager.allocate_image_memory(
        &MemoryRequirements::new(atlas_size, 4096, 0b1),
        MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    // Scratch memory through a standalone stack heap
    let granularity = device.get()?.buffer_image_granularity();
    let scratch = HeapHandle::stack(&device, 1, 64 * granularity)?;
    scratch.push()?;
    let _staging = scratch.allocate(MemoryType::Buffer, 4096, 256)?;
    let _upload = scratch.allocate(MemoryType::Image, 4096, 256)?;
    if let StackPop::Restored(pointer) = scratch.pop()? {
        info!(pointer, "Scratch frame popped");
    }

    let manager_after_frames = manager.stats();
    for block in persistent {
        block.free()?;
    }
    atlas.free()?;
    let gc = manager.garbage_collect();
    let manager_after_gc = manager.stats();

    manager.free_all()?;
    scratch.release()?;

    let report = Report {
        manager_after_frames,
        gc,
        manager_after_gc,
        host: host.counters(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
