// SPDX-License-Identifier: CEPL-1.0
//! Vulkan device for the batched quad renderer.
#![deny(unsafe_op_in_unsafe_fn)]

use std::path::PathBuf;
use std::sync::Arc;

use quadrant_render::{BatchRenderer, RenderWindow, RendererSettings, Result};

mod arena;
mod buffer;
mod context;
mod device;
mod frame;
mod image;
mod passes;
mod pipeline;
mod swapchain;
mod target;

pub use device::VkDevice2D;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VkVsyncMode {
    /// Target monitor refresh rate
    Fifo,
    /// Smart vsync, fps uncapped
    #[default]
    Mailbox,
}

#[derive(Clone, Debug)]
pub struct VkSettings {
    pub vsync: bool,
    pub vsync_mode: VkVsyncMode,
    /// Directory holding `quad.vert.spv` and `quad.frag.spv` to use instead of
    /// the shaders compiled into the crate.
    pub shader_dir: Option<PathBuf>,
}

impl Default for VkSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            vsync_mode: VkVsyncMode::default(),
            shader_dir: None,
        }
    }
}

pub fn create_renderer(
    window: Arc<dyn RenderWindow>,
    settings: &RendererSettings,
    vk_settings: &VkSettings,
) -> Result<BatchRenderer<VkDevice2D>> {
    let device = VkDevice2D::new(window, settings, vk_settings)?;
    BatchRenderer::new(device, settings)
}
