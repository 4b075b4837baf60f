// SPDX-License-Identifier: CEPL-1.0
//! Windowing for the demo and for anything else that presents through winit.
use std::sync::Arc;

use anyhow::Context as _;
use quadrant_render::{RenderSize, RenderWindow};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::info;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

pub use winit;

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// A winit window the renderers can present into.
pub struct PlatformWindow {
    window: Window,
}

impl PlatformWindow {
    pub fn create(
        event_loop: &ActiveEventLoop,
        title: &str,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Arc<Self>> {
        let attrs = Window::default_attributes()
            .with_title(title)
            .with_inner_size(LogicalSize::new(width, height));
        let window = event_loop.create_window(attrs).context("create_window")?;
        let size = window.inner_size();
        info!("window \"{title}\" {}x{}", size.width, size.height);
        Ok(Arc::new(Self { window }))
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl RenderWindow for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        render_size(self.window.inner_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_size_is_zero() {
        assert!(render_size(PhysicalSize::new(0, 720)).is_zero());
        assert_eq!(render_size(PhysicalSize::new(1280, 720)), RenderSize::new(1280, 720));
    }
}
