// SPDX-License-Identifier: CEPL-1.0
//! The seam between the frame driver and a graphics API.
use quadrant_math::Mat4;

use crate::batch::BatchLimits;
use crate::error::Result;
use crate::frame::{FrameIndex, ImageIndex};
use crate::target::{RenderTargetDesc, RenderTargetId, ResolvedPass};
use crate::texture::TextureId;
use crate::vertex::QuadVertex;
use crate::RenderSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: ImageIndex, suboptimal: bool },
    /// The surface no longer matches the swapchain; nothing was acquired.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    /// The image was not presented.
    Stale,
}

/// One sealed batch, ready to upload and draw.
#[derive(Clone, Copy, Debug)]
pub struct SealedBatch<'a> {
    pub vertices: &'a [QuadVertex],
    pub index_count: u32,
    /// Slot `i` of the table binds `textures[i]`.
    pub textures: &'a [TextureId],
    pub view_projection: Mat4,
}

/// Backend operations the frame driver sequences.
///
/// Fences and command buffers are addressed by [`FrameIndex`], swapchain
/// images by [`ImageIndex`]. The driver guarantees that a frame's fence has
/// been waited on before `reset_frame` or `begin_commands` for that frame,
/// and that the device is idle before `recreate_swapchain`.
pub trait GpuDevice {
    fn limits(&self) -> BatchLimits;
    fn frames_in_flight(&self) -> usize;
    fn image_count(&self) -> usize;
    fn swapchain_extent(&self) -> RenderSize;

    /// Blocks until the frame's last submission has completed.
    fn wait_for_frame(&mut self, frame: FrameIndex) -> Result<()>;
    fn reset_frame(&mut self, frame: FrameIndex) -> Result<()>;
    fn acquire_image(&mut self, frame: FrameIndex) -> Result<Acquire>;

    /// Resets and begins the frame's command buffer and per-frame scratch memory.
    fn begin_commands(&mut self, frame: FrameIndex, image: ImageIndex) -> Result<()>;
    fn begin_pass(&mut self, frame: FrameIndex, pass: &ResolvedPass) -> Result<()>;
    fn draw_batch(&mut self, frame: FrameIndex, batch: &SealedBatch<'_>) -> Result<()>;
    fn end_pass(&mut self, frame: FrameIndex) -> Result<()>;

    /// Ends recording and submits, signaling the frame's fence on completion.
    fn submit(&mut self, frame: FrameIndex, image: ImageIndex) -> Result<()>;
    fn present(&mut self, frame: FrameIndex, image: ImageIndex) -> Result<PresentOutcome>;

    /// Rebuilds size-dependent resources. Polls while the window is minimized.
    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()>;
    fn wait_idle(&mut self) -> Result<()>;

    fn create_texture(&mut self, id: TextureId, width: u32, height: u32, rgba: &[u8])
        -> Result<()>;
    fn destroy_texture(&mut self, id: TextureId) -> Result<()>;

    /// `texture` becomes a sampleable alias of the target's color attachment.
    fn create_render_target(
        &mut self,
        id: RenderTargetId,
        texture: TextureId,
        desc: &RenderTargetDesc,
    ) -> Result<()>;
    fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<()>;

    /// Releases every GPU object. The device is unusable afterwards.
    fn shutdown(&mut self);
}
