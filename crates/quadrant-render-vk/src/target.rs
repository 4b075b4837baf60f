// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use quadrant_render::Result;

use crate::buffer::one_shot;
use crate::context::VkContext;
use crate::image::{transition, GpuImage, LayoutChange};
use crate::passes::{create_framebuffer, PassSet};

pub const TARGET_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Color and depth images for one offscreen render target.
///
/// Color rests in SHADER_READ_ONLY_OPTIMAL between passes so it can be
/// sampled from any later pass.
pub struct OffscreenTarget {
    pub color: GpuImage,
    pub depth: GpuImage,
    pub framebuffer: vk::Framebuffer,
}

impl OffscreenTarget {
    pub unsafe fn new(
        ctx: &VkContext,
        pool: vk::CommandPool,
        passes: &PassSet,
        depth_format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let d = &ctx.device;
        let mut color = unsafe {
            GpuImage::new(
                ctx,
                extent,
                TARGET_COLOR_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::COLOR,
            )?
        };
        let mut depth = match unsafe { GpuImage::depth(ctx, extent, depth_format) } {
            Ok(depth) => depth,
            Err(e) => {
                unsafe { color.destroy(d) };
                return Err(e);
            }
        };

        let built = unsafe {
            one_shot(ctx, pool, |cmd| {
                transition(d, cmd, &color, LayoutChange::TARGET_COLOR);
                transition(d, cmd, &depth, LayoutChange::TARGET_DEPTH);
            })
            .and_then(|_| {
                create_framebuffer(d, passes.compatible(), &[color.view, depth.view], extent)
            })
        };
        match built {
            Ok(framebuffer) => Ok(Self {
                color,
                depth,
                framebuffer,
            }),
            Err(e) => {
                unsafe {
                    depth.destroy(d);
                    color.destroy(d);
                }
                Err(e)
            }
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.color.extent
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_framebuffer(self.framebuffer, None);
            self.depth.destroy(device);
            self.color.destroy(device);
        }
        self.framebuffer = vk::Framebuffer::null();
    }
}
