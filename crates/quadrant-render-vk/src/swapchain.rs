// SPDX-License-Identifier: CEPL-1.0
use anyhow::Context as _;
use ash::khr::swapchain;
use ash::vk;
use quadrant_render::{RenderError, RenderSize, Result};
use tracing::info;

use crate::context::VkContext;
use crate::image::GpuImage;
use crate::passes::{create_framebuffer, PassSet};
use crate::VkVsyncMode;

fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// BGRA8 sRGB with the sRGB color space if offered, otherwise whatever comes first.
pub fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO is the only mode Vulkan guarantees, so it is always the last resort.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VkVsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX],
        (true, VkVsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX],
        (true, VkVsyncMode::Fifo) => &[],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 == no maximum).
pub fn image_count_from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub hint: RenderSize,
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
}

/// Chosen surface parameters, queried fresh on every rebuild.
pub struct SurfaceChoice {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    caps: vk::SurfaceCapabilitiesKHR,
}

pub unsafe fn query_surface(ctx: &VkContext, cfg: SwapchainConfig) -> Result<SurfaceChoice> {
    let s = &ctx.surface_loader;
    let caps = unsafe { s.get_physical_device_surface_capabilities(ctx.phys, ctx.surface) }
        .context("get_physical_device_surface_capabilities")?;
    let formats = unsafe { s.get_physical_device_surface_formats(ctx.phys, ctx.surface) }
        .context("get_physical_device_surface_formats")?;
    let modes = unsafe { s.get_physical_device_surface_present_modes(ctx.phys, ctx.surface) }
        .context("get_physical_device_surface_present_modes")?;

    let format = pick_surface_format(&formats)
        .ok_or_else(|| RenderError::Unsupported("surface reports no formats".into()))?;
    Ok(SurfaceChoice {
        format,
        present_mode: choose_present_mode(&modes, cfg.vsync, cfg.vsync_mode),
        extent: extent_from_caps(&caps, cfg.hint),
        caps,
    })
}

/// Presentable images plus everything sized to them.
///
/// `framebuffers` and `render_finished` are indexed by swapchain image, not
/// by frame in flight. Each framebuffer serves every pass in the swapchain
/// [`PassSet`].
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub depth: GpuImage,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_finished: Vec<vk::Semaphore>,
}

impl Swapchain {
    pub unsafe fn new(
        ctx: &VkContext,
        loader: &swapchain::Device,
        choice: &SurfaceChoice,
        passes: &PassSet,
        depth_format: vk::Format,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let d = &ctx.device;
        let caps = &choice.caps;
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        let min_count = image_count_from_caps(caps);

        info!(
            "vk: swapchain format {} / present {} / {}x{} (min images {})",
            fmt_name(choice.format.format),
            pm_name(choice.present_mode),
            choice.extent.width,
            choice.extent.height,
            min_count
        );

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: min_count,
            image_format: choice.format.format,
            image_color_space: choice.format.color_space,
            image_extent: choice.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: choice.present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };
        let handle =
            unsafe { loader.create_swapchain(&swap_info, None) }.context("create_swapchain")?;
        let images =
            unsafe { loader.get_swapchain_images(handle) }.context("get_swapchain_images")?;

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: choice.format.format,
                subresource_range: crate::image::subresource(vk::ImageAspectFlags::COLOR),
                ..Default::default()
            };
            views.push(
                unsafe { d.create_image_view(&iv_info, None) }.context("create_image_view(sc)")?,
            );
        }

        let depth = unsafe { GpuImage::depth(ctx, choice.extent, depth_format)? };

        let mut framebuffers = Vec::with_capacity(images.len());
        for &view in &views {
            let attachments = [view, depth.view];
            framebuffers.push(unsafe {
                create_framebuffer(d, passes.compatible(), &attachments, choice.extent)?
            });
        }

        let sem_ci = vk::SemaphoreCreateInfo::default();
        let mut render_finished = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            render_finished
                .push(unsafe { d.create_semaphore(&sem_ci, None) }.context("create_semaphore")?);
        }

        Ok(Self {
            handle,
            format: choice.format.format,
            extent: choice.extent,
            images,
            views,
            depth,
            framebuffers,
            render_finished,
        })
    }

    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.extent.width, self.extent.height)
    }

    /// Framebuffers and views before the swapchain itself. The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device, loader: &swapchain::Device) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                device.destroy_framebuffer(fb, None);
            }
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            for sem in self.render_finished.drain(..) {
                device.destroy_semaphore(sem, None);
            }
            self.depth.destroy(device);
            loader.destroy_swapchain(self.handle, None);
        }
        self.handle = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb() {
        let formats = [
            sf(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            sf(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            pick_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            sf(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            sf(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            pick_surface_format(&formats).unwrap().format,
            vk::Format::R16G16B16A16_SFLOAT
        );
        assert!(pick_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_when_available() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, true, VkVsyncMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, true, VkVsyncMode::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], true, VkVsyncMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn no_vsync_prefers_immediate() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&modes, false, VkVsyncMode::Fifo),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn fixed_extent_is_taken_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        let e = extent_from_caps(&caps, RenderSize::new(10, 10));
        assert_eq!((e.width, e.height), (1280, 720));
    }

    #[test]
    fn free_extent_is_clamped() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        };
        let e = extent_from_caps(&caps, RenderSize::new(8, 3000));
        assert_eq!((e.width, e.height), (16, 2048));
    }

    #[test]
    fn image_count_respects_max() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(image_count_from_caps(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(image_count_from_caps(&caps), 2);
    }
}
