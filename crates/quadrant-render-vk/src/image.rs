// SPDX-License-Identifier: CEPL-1.0
use anyhow::Context as _;
use ash::vk;
use quadrant_render::{RenderError, Result};

use crate::buffer::{find_memory_type, one_shot, GpuBuffer};
use crate::context::VkContext;

/// Depth formats in order of preference.
const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

pub unsafe fn pick_depth_format(ctx: &VkContext) -> Result<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&fmt| {
            let props =
                unsafe { ctx.instance.get_physical_device_format_properties(ctx.phys, fmt) };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| RenderError::Unsupported("no usable depth format".into()))
}

pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
}

impl GpuImage {
    pub unsafe fn new(
        ctx: &VkContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let d = &ctx.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { d.create_image(&img_ci, None) }.context("create_image")?;

        let req = unsafe { d.get_image_memory_requirements(image) };
        let mem_type = find_memory_type(
            &ctx.mem_props,
            req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        let memory = unsafe { d.allocate_memory(&alloc, None) }.context("allocate_memory(image)")?;
        unsafe { d.bind_image_memory(image, memory, 0) }.context("bind_image_memory")?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: subresource(aspect),
            ..Default::default()
        };
        let view = unsafe { d.create_image_view(&view_ci, None) }.context("create_image_view")?;

        Ok(Self {
            image,
            memory,
            view,
            extent,
            aspect,
        })
    }

    pub unsafe fn depth(ctx: &VkContext, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        unsafe {
            Self::new(
                ctx,
                extent,
                format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                depth_aspect(format),
            )
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
        self.view = vk::ImageView::null();
        self.image = vk::Image::null();
        self.memory = vk::DeviceMemory::null();
    }
}

pub fn subresource(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[derive(Clone, Copy)]
pub struct LayoutChange {
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

impl LayoutChange {
    pub const UPLOAD_DST: Self = Self {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        src_access: vk::AccessFlags::empty(),
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
    };

    pub const UPLOAD_DONE: Self = Self {
        old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        dst_access: vk::AccessFlags::SHADER_READ,
    };

    /// Fresh color target made sampleable before anything renders into it.
    pub const TARGET_COLOR: Self = Self {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        src_access: vk::AccessFlags::empty(),
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        dst_access: vk::AccessFlags::SHADER_READ,
    };

    pub const TARGET_DEPTH: Self = Self {
        old: vk::ImageLayout::UNDEFINED,
        new: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        src_access: vk::AccessFlags::empty(),
        dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        dst_access: vk::AccessFlags::from_raw(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
    };
}

pub unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: &GpuImage,
    change: LayoutChange,
) {
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: change.src_access,
        dst_access_mask: change.dst_access,
        old_layout: change.old,
        new_layout: change.new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: image.image,
        subresource_range: subresource(image.aspect),
        ..Default::default()
    };
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            change.src_stage,
            change.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }
}

/// Sampled RGBA8 texture with its pixels uploaded, left in SHADER_READ_ONLY_OPTIMAL.
pub unsafe fn create_texture(
    ctx: &VkContext,
    pool: vk::CommandPool,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> Result<GpuImage> {
    let extent = vk::Extent2D { width, height };
    let mut image = unsafe {
        GpuImage::new(
            ctx,
            extent,
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?
    };
    let mut staging = unsafe {
        GpuBuffer::host_visible(
            ctx,
            rgba.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?
    };
    let uploaded = unsafe {
        staging.write(0, rgba);
        one_shot(ctx, pool, |cmd| {
            transition(&ctx.device, cmd, &image, LayoutChange::UPLOAD_DST);
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            };
            ctx.device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            transition(&ctx.device, cmd, &image, LayoutChange::UPLOAD_DONE);
        })
    };
    unsafe { staging.destroy(&ctx.device) };
    if let Err(e) = uploaded {
        unsafe { image.destroy(&ctx.device) };
        return Err(e);
    }
    Ok(image)
}

/// Linear filtering, repeat addressing so tiling factors > 1 wrap.
pub unsafe fn create_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        max_lod: 1.0,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        ..Default::default()
    };
    let sampler = unsafe { device.create_sampler(&ci, None) }.context("create_sampler")?;
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_formats_get_both_aspects() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
