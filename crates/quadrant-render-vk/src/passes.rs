// SPDX-License-Identifier: CEPL-1.0
use anyhow::Context as _;
use ash::vk;
use quadrant_render::{PassKind, Result};

/// Where a pass set renders to. Decides the color layout each pass leaves behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassSurface {
    Swapchain,
    /// Leaves color sampleable so later passes can read it as a texture.
    Offscreen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PassLayout {
    color_load: vk::AttachmentLoadOp,
    color_initial: vk::ImageLayout,
    color_final: vk::ImageLayout,
    depth_load: vk::AttachmentLoadOp,
    depth_initial: vk::ImageLayout,
}

fn layout_for(surface: PassSurface, kind: PassKind) -> PassLayout {
    use vk::AttachmentLoadOp as Load;
    use vk::ImageLayout as L;

    let resting = match surface {
        PassSurface::Swapchain => L::COLOR_ATTACHMENT_OPTIMAL,
        PassSurface::Offscreen => L::SHADER_READ_ONLY_OPTIMAL,
    };
    match kind {
        PassKind::Clear => PassLayout {
            color_load: Load::CLEAR,
            color_initial: L::UNDEFINED,
            color_final: resting,
            depth_load: Load::CLEAR,
            depth_initial: L::UNDEFINED,
        },
        PassKind::Draw => PassLayout {
            color_load: Load::LOAD,
            color_initial: resting,
            color_final: resting,
            depth_load: Load::LOAD,
            depth_initial: L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
        // depth is cleared so overlay content always lands on top
        PassKind::Overlay => PassLayout {
            color_load: Load::LOAD,
            color_initial: resting,
            color_final: match surface {
                PassSurface::Swapchain => L::PRESENT_SRC_KHR,
                PassSurface::Offscreen => resting,
            },
            depth_load: Load::CLEAR,
            depth_initial: L::UNDEFINED,
        },
    }
}

unsafe fn create_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    surface: PassSurface,
    layout: PassLayout,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: layout.color_load,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: layout.color_initial,
            final_layout: layout.color_final,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: layout.depth_load,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: layout.depth_initial,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };

    let fragment_tests = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_write = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::COLOR_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    let mut deps = vec![vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | fragment_tests
            | vk::PipelineStageFlags::FRAGMENT_SHADER,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | fragment_tests,
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: attachment_write,
        ..Default::default()
    }];
    if surface == PassSurface::Offscreen {
        deps.push(vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
            ..Default::default()
        });
    }

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: deps.len() as u32,
        p_dependencies: deps.as_ptr(),
        ..Default::default()
    };
    let pass = unsafe { device.create_render_pass(&rp_info, None) }.context("create_render_pass")?;
    Ok(pass)
}

/// Clear, draw and overlay variants of one attachment configuration.
///
/// The variants only differ in load ops and layouts, so they are render-pass
/// compatible: one framebuffer and one pipeline serve all three.
pub struct PassSet {
    pub color_format: vk::Format,
    passes: [vk::RenderPass; 3],
}

impl PassSet {
    pub unsafe fn new(
        device: &ash::Device,
        surface: PassSurface,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let mut passes = [vk::RenderPass::null(); 3];
        for kind in [PassKind::Clear, PassKind::Draw, PassKind::Overlay] {
            let layout = layout_for(surface, kind);
            match unsafe { create_pass(device, color_format, depth_format, surface, layout) } {
                Ok(p) => passes[slot(kind)] = p,
                Err(e) => {
                    for p in passes.into_iter().filter(|p| *p != vk::RenderPass::null()) {
                        unsafe { device.destroy_render_pass(p, None) };
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            color_format,
            passes,
        })
    }

    pub fn get(&self, kind: PassKind) -> vk::RenderPass {
        self.passes[slot(kind)]
    }

    /// Any variant; used where only compatibility matters.
    pub fn compatible(&self) -> vk::RenderPass {
        self.passes[0]
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for p in &mut self.passes {
            unsafe { device.destroy_render_pass(*p, None) };
            *p = vk::RenderPass::null();
        }
    }
}

fn slot(kind: PassKind) -> usize {
    match kind {
        PassKind::Clear => 0,
        PassKind::Draw => 1,
        PassKind::Overlay => 2,
    }
}

pub unsafe fn create_framebuffer(
    device: &ash::Device,
    pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let fb_info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass: pass,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    let fb = unsafe { device.create_framebuffer(&fb_info, None) }.context("create_framebuffer")?;
    Ok(fb)
}

/// Clear values in attachment order: color, then depth 1.0.
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_overlay_ends_presentable() {
        let l = layout_for(PassSurface::Swapchain, PassKind::Overlay);
        assert_eq!(l.color_final, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(l.color_load, vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn clear_discards_previous_contents() {
        for surface in [PassSurface::Swapchain, PassSurface::Offscreen] {
            let l = layout_for(surface, PassKind::Clear);
            assert_eq!(l.color_initial, vk::ImageLayout::UNDEFINED);
            assert_eq!(l.color_load, vk::AttachmentLoadOp::CLEAR);
            assert_eq!(l.depth_load, vk::AttachmentLoadOp::CLEAR);
        }
    }

    #[test]
    fn offscreen_passes_leave_color_sampleable() {
        for kind in [PassKind::Clear, PassKind::Draw, PassKind::Overlay] {
            let l = layout_for(PassSurface::Offscreen, kind);
            assert_eq!(l.color_final, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
        let draw = layout_for(PassSurface::Offscreen, PassKind::Draw);
        assert_eq!(draw.color_initial, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn draw_continues_where_clear_left_off() {
        let clear = layout_for(PassSurface::Swapchain, PassKind::Clear);
        let draw = layout_for(PassSurface::Swapchain, PassKind::Draw);
        let overlay = layout_for(PassSurface::Swapchain, PassKind::Overlay);
        assert_eq!(clear.color_final, draw.color_initial);
        assert_eq!(draw.color_final, overlay.color_initial);
    }
}
