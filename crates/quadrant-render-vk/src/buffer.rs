// SPDX-License-Identifier: CEPL-1.0
use anyhow::Context as _;
use ash::vk;
use quadrant_core::contract;
use quadrant_render::{RenderError, Result};

use crate::context::VkContext;

pub fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or_else(|| RenderError::Unsupported(format!("no memory type with {req:?}")))
}

/// A buffer and its dedicated allocation. Host-visible buffers stay mapped.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    mapped: *mut u8,
}

impl GpuBuffer {
    pub unsafe fn new(
        ctx: &VkContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let d = &ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { d.create_buffer(&bci, None) }.context("create_buffer")?;
        let req = unsafe { d.get_buffer_memory_requirements(buffer) };
        let mem_type = match find_memory_type(&ctx.mem_props, req.memory_type_bits, props) {
            Ok(t) => t,
            Err(e) => {
                unsafe { d.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        let memory = unsafe { d.allocate_memory(&mai, None) }.context("allocate_memory(buffer)")?;
        unsafe { d.bind_buffer_memory(buffer, memory, 0) }.context("bind_buffer_memory")?;

        let mapped = if props.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            unsafe { d.map_memory(memory, 0, size, vk::MemoryMapFlags::empty()) }
                .context("map_memory")? as *mut u8
        } else {
            std::ptr::null_mut()
        };

        Ok(Self {
            buffer,
            memory,
            size,
            mapped,
        })
    }

    pub unsafe fn host_visible(
        ctx: &VkContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        unsafe {
            Self::new(
                ctx,
                size,
                usage,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
        }
    }

    /// Copies into the persistent mapping. The GPU must not be reading the range.
    pub unsafe fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) {
        if !contract!(!self.mapped.is_null(), "write to an unmapped buffer")
            || !contract!(
                offset + bytes.len() as vk::DeviceSize <= self.size,
                "buffer write {}+{} past {}",
                offset,
                bytes.len(),
                self.size
            )
        {
            return;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.mapped.add(offset as usize),
                bytes.len(),
            );
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if !self.mapped.is_null() {
                device.unmap_memory(self.memory);
                self.mapped = std::ptr::null_mut();
            }
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// Records `f` into a throwaway command buffer, submits it and waits for the queue.
pub unsafe fn one_shot(
    ctx: &VkContext,
    pool: vk::CommandPool,
    f: impl FnOnce(vk::CommandBuffer),
) -> Result<()> {
    let d = &ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = unsafe { d.allocate_command_buffers(&ai) }.context("allocate_command_buffers")?[0];
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    let submitted = unsafe {
        d.begin_command_buffer(cmd, &bi)
            .and_then(|_| {
                f(cmd);
                d.end_command_buffer(cmd)
            })
            .and_then(|_| {
                let si = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: &cmd,
                    ..Default::default()
                };
                d.queue_submit(ctx.queue, std::slice::from_ref(&si), vk::Fence::null())
            })
            .and_then(|_| d.queue_wait_idle(ctx.queue))
    };
    unsafe { d.free_command_buffers(pool, std::slice::from_ref(&cmd)) };
    submitted.context("one-shot submit")?;
    Ok(())
}

/// Host -> staging -> `dst` (device-local). Blocks until the copy completes.
pub unsafe fn upload_via_staging(
    ctx: &VkContext,
    pool: vk::CommandPool,
    dst: vk::Buffer,
    src_data: &[u8],
) -> Result<()> {
    let size = src_data.len() as vk::DeviceSize;
    let mut staging =
        unsafe { GpuBuffer::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)? };
    let result = unsafe {
        staging.write(0, src_data);
        one_shot(ctx, pool, |cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            ctx.device
                .cmd_copy_buffer(cmd, staging.buffer, dst, std::slice::from_ref(&region));
        })
    };
    unsafe { staging.destroy(&ctx.device) };
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            mem.memory_types[i].property_flags = *f;
        }
        mem
    }

    #[test]
    fn picks_first_matching_allowed_type() {
        let mem = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&mem, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&mem, 0b100, host).unwrap(), 2);
    }

    #[test]
    fn missing_type_is_unsupported() {
        let mem = props(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let err = find_memory_type(&mem, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(matches!(err, Err(RenderError::Unsupported(_))));
    }
}
