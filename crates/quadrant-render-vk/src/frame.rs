// SPDX-License-Identifier: CEPL-1.0
use anyhow::Context as _;
use ash::vk;
use quadrant_render::Result;

use crate::arena::{DescriptorArena, VertexArena};

/// Everything one frame in flight records into.
///
/// `in_flight` starts signaled so the first wait on a fresh slot returns at once.
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub cmd: vk::CommandBuffer,
    pub vertices: VertexArena,
    pub descriptors: DescriptorArena,
}

impl FrameSlot {
    pub unsafe fn new(
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        vertex_chunk_bytes: vk::DeviceSize,
    ) -> Result<Self> {
        let sem_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let image_available =
            unsafe { device.create_semaphore(&sem_info, None) }.context("create_semaphore")?;
        let in_flight = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(f) => f,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(anyhow::Error::from(e).context("create_fence").into());
            }
        };
        Ok(Self {
            image_available,
            in_flight,
            cmd,
            vertices: VertexArena::new(vertex_chunk_bytes),
            descriptors: DescriptorArena::new(),
        })
    }

    /// Rewinds scratch memory. The slot's fence must have signaled.
    pub unsafe fn recycle(&mut self, device: &ash::Device) -> Result<()> {
        self.vertices.reset();
        unsafe { self.descriptors.reset(device) }
    }

    /// Command buffers are freed with their pool, not here.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            self.descriptors.destroy(device);
            self.vertices.destroy(device);
            device.destroy_fence(self.in_flight, None);
            device.destroy_semaphore(self.image_available, None);
        }
    }
}
