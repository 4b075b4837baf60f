// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic half of the batched quad renderer.
//!
//! [`BatchRenderer`] drives frames and scenes on top of any [`GpuDevice`];
//! the Vulkan and GL crates only provide the device.
use std::time::Duration;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::debug;

pub mod batch;
pub mod device;
pub mod error;
pub mod frame;
pub mod renderer;
pub mod stats;
pub mod target;
pub mod texture;
pub mod vertex;

pub use batch::{BatchAccumulator, BatchLimits};
pub use device::{Acquire, GpuDevice, PresentOutcome, SealedBatch};
pub use error::{RenderError, Result};
pub use frame::{FrameIndex, FrameRing, ImageIndex, SlotState};
pub use renderer::{BatchRenderer, Renderer2D};
pub use stats::RenderStats;
pub use target::{
    PassKind, PassTarget, RenderTargetDesc, RenderTargetHandle, RenderTargetId,
    ResolvedPass, TargetRouter, Viewport,
};
pub use texture::{TextureHandle, TextureId};
pub use vertex::QuadVertex;

pub use quadrant_math::{Mat4, Vec2, Vec3, Vec4};

/// Object id written by draws that don't carry one.
pub const NO_OBJECT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero dimension.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What a backend needs from the window it presents into.
pub trait RenderWindow: HasWindowHandle + HasDisplayHandle + Send + Sync {
    /// Current framebuffer size in physical pixels.
    fn framebuffer_size(&self) -> RenderSize;
}

/// Interval between size checks while the window is minimized.
pub const MINIMIZED_POLL: Duration = Duration::from_millis(16);

/// Blocks until the window reports a non-zero size, checking every `poll`.
pub fn wait_for_drawable(window: &dyn RenderWindow, poll: Duration) -> RenderSize {
    let mut size = window.framebuffer_size();
    if size.is_zero() {
        debug!("window minimized, waiting for a drawable size");
    }
    while size.is_zero() {
        std::thread::sleep(poll);
        size = window.framebuffer_size();
    }
    size
}

#[derive(Clone, Debug)]
pub struct RendererSettings {
    pub frames_in_flight: usize,
    pub limits: BatchLimits,
    pub clear_color: Vec4,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            limits: BatchLimits::default(),
            clear_color: Vec4::new(0.02, 0.02, 0.04, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use raw_window_handle::{DisplayHandle, HandleError, WindowHandle};

    use super::*;

    /// Reports zero until it has been asked `restored_after` times.
    struct MinimizedWindow {
        polls: AtomicU32,
        restored_after: u32,
    }

    impl HasWindowHandle for MinimizedWindow {
        fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    impl HasDisplayHandle for MinimizedWindow {
        fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    impl RenderWindow for MinimizedWindow {
        fn framebuffer_size(&self) -> RenderSize {
            let seen = self.polls.fetch_add(1, Ordering::Relaxed);
            if seen < self.restored_after {
                RenderSize::new(0, 720)
            } else {
                RenderSize::new(1280, 720)
            }
        }
    }

    #[test]
    fn waits_until_window_is_restored() {
        let window = MinimizedWindow {
            polls: AtomicU32::new(0),
            restored_after: 3,
        };
        let size = wait_for_drawable(&window, Duration::ZERO);
        assert_eq!(size, RenderSize::new(1280, 720));
        assert_eq!(window.polls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn visible_window_is_read_once() {
        let window = MinimizedWindow {
            polls: AtomicU32::new(0),
            restored_after: 0,
        };
        assert_eq!(wait_for_drawable(&window, MINIMIZED_POLL), RenderSize::new(1280, 720));
        assert_eq!(window.polls.load(Ordering::Relaxed), 1);
    }
}
