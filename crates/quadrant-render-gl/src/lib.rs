// SPDX-License-Identifier: CEPL-1.0
//! OpenGL 3.3 device for the batched quad renderer.
#![deny(unsafe_op_in_unsafe_fn)]

use std::sync::Arc;

use quadrant_render::{BatchRenderer, RenderWindow, RendererSettings, Result};

mod device;
mod program;

pub use device::GlDevice;

#[derive(Clone, Debug)]
pub struct GlSettings {
    pub vsync: bool,
}

impl Default for GlSettings {
    fn default() -> Self {
        Self { vsync: true }
    }
}

pub fn create_renderer(
    window: Arc<dyn RenderWindow>,
    settings: &RendererSettings,
    gl_settings: &GlSettings,
) -> Result<BatchRenderer<GlDevice>> {
    let device = GlDevice::new(window, settings, gl_settings)?;
    BatchRenderer::new(device, settings)
}
