// SPDX-License-Identifier: CEPL-1.0
//! Per-frame scratch memory, recycled wholesale once the frame's fence signals.
use anyhow::Context as _;
use ash::vk;
use quadrant_core::contract;
use quadrant_render::{RenderError, Result};

use crate::buffer::GpuBuffer;
use crate::context::VkContext;
use crate::pipeline::TEXTURE_SLOTS;

const SETS_PER_POOL: u32 = 16;

/// Descriptor pools that grow on demand and reset together.
pub struct DescriptorArena {
    pools: Vec<vk::DescriptorPool>,
    current: usize,
}

impl DescriptorArena {
    pub fn new() -> Self {
        Self {
            pools: Vec::new(),
            current: 0,
        }
    }

    unsafe fn create_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
        let size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: SETS_PER_POOL * TEXTURE_SLOTS,
        };
        let ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: SETS_PER_POOL,
            pool_size_count: 1,
            p_pool_sizes: &size,
            ..Default::default()
        };
        let pool =
            unsafe { device.create_descriptor_pool(&ci, None) }.context("create_descriptor_pool")?;
        Ok(pool)
    }

    pub unsafe fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        loop {
            if self.current == self.pools.len() {
                self.pools.push(unsafe { Self::create_pool(device)? });
            }
            let ai = vk::DescriptorSetAllocateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                descriptor_pool: self.pools[self.current],
                descriptor_set_count: 1,
                p_set_layouts: &layout,
                ..Default::default()
            };
            match unsafe { device.allocate_descriptor_sets(&ai) } {
                Ok(sets) => return Ok(sets[0]),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                    self.current += 1;
                }
                Err(e) => {
                    return Err(RenderError::Backend(anyhow::anyhow!(
                        "allocate_descriptor_sets: {e:?}"
                    )))
                }
            }
        }
    }

    /// Frees every set. The frame using them must have completed.
    pub unsafe fn reset(&mut self, device: &ash::Device) -> Result<()> {
        for &pool in &self.pools {
            unsafe { device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
                .context("reset_descriptor_pool")?;
        }
        self.current = 0;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
        self.current = 0;
    }
}

/// Host-visible vertex chunks, each large enough for one full batch.
pub struct VertexArena {
    chunk_bytes: vk::DeviceSize,
    chunks: Vec<GpuBuffer>,
    chunk: usize,
    cursor: vk::DeviceSize,
}

impl VertexArena {
    pub fn new(chunk_bytes: vk::DeviceSize) -> Self {
        Self {
            chunk_bytes,
            chunks: Vec::new(),
            chunk: 0,
            cursor: 0,
        }
    }

    /// Copies `bytes` into the arena and returns where they landed.
    pub unsafe fn push(
        &mut self,
        ctx: &VkContext,
        bytes: &[u8],
    ) -> Result<(vk::Buffer, vk::DeviceSize)> {
        let len = bytes.len() as vk::DeviceSize;
        if !contract!(
            len <= self.chunk_bytes,
            "batch of {} bytes exceeds vertex chunk of {}",
            len,
            self.chunk_bytes
        ) {
            return Err(RenderError::InvalidArgument(format!(
                "vertex upload of {len} bytes"
            )));
        }
        let (chunk, offset) = next_range(self.chunk, self.cursor, len, self.chunk_bytes);
        while chunk >= self.chunks.len() {
            self.chunks.push(unsafe {
                GpuBuffer::host_visible(ctx, self.chunk_bytes, vk::BufferUsageFlags::VERTEX_BUFFER)?
            });
        }
        let dst = &self.chunks[chunk];
        unsafe { dst.write(offset, bytes) };
        self.chunk = chunk;
        self.cursor = offset + len;
        Ok((dst.buffer, offset))
    }

    pub fn reset(&mut self) {
        self.chunk = 0;
        self.cursor = 0;
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for mut chunk in self.chunks.drain(..) {
            unsafe { chunk.destroy(device) };
        }
        self.reset();
    }
}

/// Chunk and offset for `len` bytes after `cursor` in `chunk`. Spills to the next chunk.
fn next_range(
    chunk: usize,
    cursor: vk::DeviceSize,
    len: vk::DeviceSize,
    chunk_bytes: vk::DeviceSize,
) -> (usize, vk::DeviceSize) {
    if cursor + len <= chunk_bytes {
        (chunk, cursor)
    } else {
        (chunk + 1, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_pack_then_spill() {
        assert_eq!(next_range(0, 0, 100, 256), (0, 0));
        assert_eq!(next_range(0, 100, 100, 256), (0, 100));
        assert_eq!(next_range(0, 200, 100, 256), (1, 0));
        assert_eq!(next_range(1, 0, 256, 256), (1, 0));
    }
}
