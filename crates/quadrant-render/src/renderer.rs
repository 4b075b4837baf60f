// SPDX-License-Identifier: CEPL-1.0
use quadrant_core::contract;
use quadrant_math::{
    quad_transform, rotated_quad_transform, Camera, Mat4, Vec2, Vec3, Vec4,
};
use tracing::{debug, error, info, trace};

use crate::batch::BatchAccumulator;
use crate::device::{Acquire, GpuDevice, PresentOutcome, SealedBatch};
use crate::error::{RenderError, Result};
use crate::frame::{FrameIndex, FrameRing, ImageIndex};
use crate::stats::RenderStats;
use crate::target::{
    PassKind, PassTarget, RenderTargetDesc, RenderTargetHandle, RenderTargetId, TargetRouter,
};
use crate::texture::{TextureHandle, TextureId};
use crate::{RenderSize, RendererSettings, NO_OBJECT};

/// The batched 2D renderer as seen by application code.
///
/// `begin_frame`/`end_frame` return `Ok(false)` when the frame was skipped
/// because the swapchain had to be rebuilt; the caller just tries again next
/// tick. Draws outside an open scene are contract violations.
pub trait Renderer2D {
    fn on_window_resize(&mut self, size: RenderSize);

    fn begin_frame(&mut self) -> Result<bool>;
    fn end_frame(&mut self) -> Result<bool>;

    fn begin_scene(&mut self, view_projection: Mat4) -> Result<()>;
    fn end_scene(&mut self) -> Result<()>;

    fn begin_scene_with_camera(&mut self, camera: &Camera, transform: &Mat4) -> Result<()> {
        self.begin_scene(camera.view_projection(transform))
    }

    fn draw_quad_transform(&mut self, transform: &Mat4, color: Vec4, object_id: u32)
        -> Result<()>;

    fn draw_textured_quad_transform(
        &mut self,
        transform: &Mat4,
        texture: &TextureHandle,
        tiling_factor: f32,
        tint: Vec4,
        object_id: u32,
    ) -> Result<()>;

    fn draw_quad(&mut self, position: Vec3, size: Vec2, color: Vec4) -> Result<()> {
        self.draw_quad_transform(&quad_transform(position, size), color, NO_OBJECT)
    }

    fn draw_textured_quad(
        &mut self,
        position: Vec3,
        size: Vec2,
        texture: &TextureHandle,
        tiling_factor: f32,
        tint: Vec4,
    ) -> Result<()> {
        self.draw_textured_quad_transform(
            &quad_transform(position, size),
            texture,
            tiling_factor,
            tint,
            NO_OBJECT,
        )
    }

    /// `rotation` in radians around Z.
    fn draw_rotated_quad(
        &mut self,
        position: Vec3,
        size: Vec2,
        rotation: f32,
        color: Vec4,
    ) -> Result<()> {
        self.draw_quad_transform(
            &rotated_quad_transform(position, size, rotation),
            color,
            NO_OBJECT,
        )
    }

    fn draw_rotated_textured_quad(
        &mut self,
        position: Vec3,
        size: Vec2,
        rotation: f32,
        texture: &TextureHandle,
        tiling_factor: f32,
        tint: Vec4,
    ) -> Result<()> {
        self.draw_textured_quad_transform(
            &rotated_quad_transform(position, size, rotation),
            texture,
            tiling_factor,
            tint,
            NO_OBJECT,
        )
    }

    fn set_render_target(&mut self, target: &RenderTargetHandle) -> Result<()>;
    fn reset_render_target(&mut self) -> Result<()>;
    fn render_target(&self) -> Option<RenderTargetId>;

    fn set_clear_color(&mut self, color: Vec4);
    /// Clears the active target with its clear color.
    fn clear(&mut self) -> Result<()>;

    fn stats(&self) -> RenderStats;
    fn reset_stats(&mut self);

    fn white_texture(&self) -> TextureHandle;
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<()>;
    fn create_render_target(&mut self, desc: RenderTargetDesc) -> Result<RenderTargetHandle>;
    fn destroy_render_target(&mut self, target: RenderTargetHandle) -> Result<()>;

    fn shutdown(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
struct ActiveFrame {
    frame: FrameIndex,
    image: ImageIndex,
    swapchain_touched: bool,
    pass_open: bool,
    scene_open: bool,
}

/// Frame driver plus batch accumulator over a [`GpuDevice`].
pub struct BatchRenderer<D: GpuDevice> {
    device: D,
    ring: FrameRing,
    batch: BatchAccumulator,
    router: TargetRouter,
    stats: RenderStats,
    white: TextureHandle,
    active: Option<ActiveFrame>,
    size: RenderSize,
    swapchain_dirty: bool,
    alive: bool,
}

impl<D: GpuDevice> BatchRenderer<D> {
    pub fn new(mut device: D, settings: &RendererSettings) -> Result<Self> {
        let limits = settings.limits.constrain(device.limits());
        let frames = device.frames_in_flight();
        contract!(
            frames == settings.frames_in_flight,
            "device built for {} frames in flight, settings ask for {}",
            frames,
            settings.frames_in_flight
        );

        let white = TextureHandle {
            id: TextureId::next(),
            width: 1,
            height: 1,
        };
        device.create_texture(white.id, 1, 1, &[0xff; 4])?;

        let size = device.swapchain_extent();
        let ring = FrameRing::new(frames, device.image_count());
        info!(
            frames_in_flight = frames,
            max_quads = limits.max_quads,
            texture_slots = limits.max_texture_slots,
            "batch renderer ready"
        );

        Ok(Self {
            ring,
            batch: BatchAccumulator::new(limits, white.id),
            router: TargetRouter::new(size, settings.clear_color),
            stats: RenderStats::default(),
            white,
            active: None,
            size,
            swapchain_dirty: false,
            alive: true,
            device,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    pub fn batch(&self) -> &BatchAccumulator {
        &self.batch
    }

    pub fn router(&self) -> &TargetRouter {
        &self.router
    }

    pub fn is_frame_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_scene_open(&self) -> bool {
        self.active.is_some_and(|a| a.scene_open)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive {
            Ok(())
        } else {
            Err(RenderError::NotInitialized)
        }
    }

    /// The open scene's frame, or `None` after logging a contract violation.
    fn scene_frame(&self, op: &str) -> Option<ActiveFrame> {
        let active = self.active.filter(|a| a.scene_open);
        contract!(active.is_some(), "{op} outside begin_scene/end_scene");
        active
    }

    fn recreate(&mut self) -> Result<()> {
        info!(
            width = self.size.width,
            height = self.size.height,
            "recreating swapchain"
        );
        self.device.wait_idle()?;
        self.device.recreate_swapchain(self.size)?;
        self.ring.reset_images(self.device.image_count());
        let extent = self.device.swapchain_extent();
        self.router.set_swapchain_extent(extent);
        self.size = extent;
        self.swapchain_dirty = false;
        Ok(())
    }

    fn open_pass(&mut self, kind: PassKind) -> Result<()> {
        let Some(mut active) = self.active else {
            return Ok(());
        };
        let mut pass = self.router.resolve(kind, active.image);
        if let PassTarget::Swapchain(_) = pass.target {
            // swapchain contents are undefined after acquire
            if !active.swapchain_touched && kind == PassKind::Draw {
                pass.kind = PassKind::Clear;
            }
            active.swapchain_touched = true;
        }
        let begun = self.device.begin_pass(active.frame, &pass);
        self.check(begun)?;
        active.pass_open = true;
        self.active = Some(active);
        Ok(())
    }

    fn close_pass(&mut self) -> Result<()> {
        if let Some(mut active) = self.active.filter(|a| a.pass_open) {
            let ended = self.device.end_pass(active.frame);
            self.check(ended)?;
            active.pass_open = false;
            self.active = Some(active);
        }
        Ok(())
    }

    /// A failed GPU call leaves the device in an unknown state, so the
    /// renderer releases it and refuses any further work.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(RenderError::Backend(e)) = &result {
            if self.alive {
                error!("renderer halted after backend failure: {e:#}");
                self.alive = false;
                self.active = None;
                self.batch.reset();
                self.device.shutdown();
            }
        }
        result
    }

    fn start_frame(&mut self) -> Result<bool> {
        self.ensure_alive()?;
        if !contract!(self.active.is_none(), "begin_frame while a frame is active") {
            return Ok(false);
        }

        let frame = self.ring.current();
        self.device.wait_for_frame(frame)?;
        self.ring.mark_complete(frame);

        self.ring.begin_acquire();
        let image = match self.device.acquire_image(frame)? {
            Acquire::Stale => {
                debug!(frame = frame.get(), "swapchain stale on acquire");
                self.ring.cancel_acquire();
                self.recreate()?;
                return Ok(false);
            }
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    self.swapchain_dirty = true;
                }
                index
            }
        };

        if let Some(owner) = self.ring.conflicting_owner(image) {
            trace!(
                image = image.get(),
                owner = owner.get(),
                "image still in flight"
            );
            self.device.wait_for_frame(owner)?;
            self.ring.mark_complete(owner);
        }
        self.ring.claim_image(image);
        self.device.begin_commands(frame, image)?;

        self.active = Some(ActiveFrame {
            frame,
            image,
            swapchain_touched: false,
            pass_open: false,
            scene_open: false,
        });
        Ok(true)
    }

    fn finish_frame(&mut self) -> Result<bool> {
        self.ensure_alive()?;
        if !contract!(self.active.is_some(), "end_frame without begin_frame") {
            return Ok(false);
        }
        if self.is_scene_open() {
            self.end_scene()?;
        }

        let Some(active) = self.active else {
            return Ok(false);
        };
        let (frame, image) = (active.frame, active.image);

        if !active.swapchain_touched {
            let pass = self.router.resolve_swapchain(PassKind::Clear, image);
            self.device.begin_pass(frame, &pass)?;
            self.device.end_pass(frame)?;
        }
        let overlay = self.router.resolve(PassKind::Overlay, image);
        self.device.begin_pass(frame, &overlay)?;
        self.device.end_pass(frame)?;

        self.device.reset_frame(frame)?;
        self.device.submit(frame, image)?;
        self.ring.mark_submitted();
        self.active = None;

        let outcome = self.device.present(frame, image)?;
        let presented = outcome != PresentOutcome::Stale;
        if outcome != PresentOutcome::Presented || self.swapchain_dirty {
            debug!(?outcome, dirty = self.swapchain_dirty, "swapchain needs rebuild");
            self.recreate()?;
        }

        self.ring.advance();
        Ok(presented)
    }

    /// Seals the current batch into one draw and starts a fresh one in the same scene.
    fn flush(&mut self) -> Result<()> {
        let Some(active) = self.active else {
            return Ok(());
        };
        if self.batch.is_empty() {
            return Ok(());
        }
        let sealed = SealedBatch {
            vertices: self.batch.vertices(),
            index_count: self.batch.index_count(),
            textures: self.batch.texture_slots(),
            view_projection: self.batch.view_projection(),
        };
        trace!(
            quads = self.batch.quad_count(),
            bytes = self.batch.byte_len(),
            textures = sealed.textures.len(),
            "flush batch"
        );
        let drawn = self.device.draw_batch(active.frame, &sealed);
        self.check(drawn)?;
        self.stats.draw_calls += 1;
        self.batch.reset();
        Ok(())
    }

    /// Seals the open scene, runs `f`, then reopens the scene on whatever target is active.
    fn with_scene_sealed(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let reopen = self.is_scene_open();
        if reopen {
            self.flush()?;
            self.close_pass()?;
        }
        f(self)?;
        if reopen {
            self.open_pass(PassKind::Draw)?;
        }
        Ok(())
    }
}

impl<D: GpuDevice> Renderer2D for BatchRenderer<D> {
    fn on_window_resize(&mut self, size: RenderSize) {
        debug!(width = size.width, height = size.height, "resize requested");
        self.size = size;
        self.swapchain_dirty = true;
    }

    fn begin_frame(&mut self) -> Result<bool> {
        let started = self.start_frame();
        self.check(started)
    }

    fn end_frame(&mut self) -> Result<bool> {
        let finished = self.finish_frame();
        self.check(finished)
    }

    fn begin_scene(&mut self, view_projection: Mat4) -> Result<()> {
        self.ensure_alive()?;
        let Some(mut active) = self.active else {
            contract!(false, "begin_scene outside begin_frame/end_frame");
            return Ok(());
        };
        if !contract!(!active.scene_open, "begin_scene while a scene is open") {
            return Ok(());
        }
        self.batch.begin(view_projection);
        active.scene_open = true;
        self.active = Some(active);
        self.open_pass(PassKind::Draw)
    }

    fn end_scene(&mut self) -> Result<()> {
        self.ensure_alive()?;
        if self.scene_frame("end_scene").is_none() {
            return Ok(());
        }
        self.flush()?;
        self.close_pass()?;
        if let Some(active) = self.active.as_mut() {
            active.scene_open = false;
        }
        Ok(())
    }

    fn draw_quad_transform(
        &mut self,
        transform: &Mat4,
        color: Vec4,
        object_id: u32,
    ) -> Result<()> {
        self.ensure_alive()?;
        if self.scene_frame("draw_quad").is_none() {
            return Ok(());
        }
        if self.batch.is_full() {
            self.flush()?;
        }
        self.batch.push_quad(transform, color, 0.0, 1.0, object_id);
        self.stats.quad_count += 1;
        Ok(())
    }

    fn draw_textured_quad_transform(
        &mut self,
        transform: &Mat4,
        texture: &TextureHandle,
        tiling_factor: f32,
        tint: Vec4,
        object_id: u32,
    ) -> Result<()> {
        self.ensure_alive()?;
        if self.scene_frame("draw_textured_quad").is_none() {
            return Ok(());
        }
        if self.batch.is_full() {
            self.flush()?;
        }
        let slot = match self.batch.slot_of(texture.id) {
            Some(slot) => slot,
            None => {
                if self.batch.slots_full() {
                    self.flush()?;
                }
                self.batch.assign_slot(texture.id)
            }
        };
        self.batch
            .push_quad(transform, tint, slot as f32, tiling_factor, object_id);
        self.stats.quad_count += 1;
        Ok(())
    }

    fn set_render_target(&mut self, target: &RenderTargetHandle) -> Result<()> {
        self.ensure_alive()?;
        if !self.router.contains(target.id) {
            return Err(RenderError::InvalidArgument(format!(
                "unknown render target {}",
                target.id.raw()
            )));
        }
        let id = target.id;
        self.with_scene_sealed(|r| r.router.activate(id))
    }

    fn reset_render_target(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.with_scene_sealed(|r| {
            r.router.deactivate();
            Ok(())
        })
    }

    fn render_target(&self) -> Option<RenderTargetId> {
        self.router.active()
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.router.set_clear_color(color);
    }

    fn clear(&mut self) -> Result<()> {
        self.ensure_alive()?;
        if !contract!(self.active.is_some(), "clear outside begin_frame/end_frame") {
            return Ok(());
        }
        self.with_scene_sealed(|r| {
            r.open_pass(PassKind::Clear)?;
            r.close_pass()
        })
    }

    fn stats(&self) -> RenderStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = RenderStats::default();
    }

    fn white_texture(&self) -> TextureHandle {
        self.white
    }

    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<TextureHandle> {
        self.ensure_alive()?;
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "texture size {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(RenderError::InvalidArgument(format!(
                "texture data is {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        let id = TextureId::next();
        self.device.create_texture(id, width, height, rgba)?;
        debug!(id = id.raw(), width, height, "texture created");
        Ok(TextureHandle { id, width, height })
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<()> {
        self.ensure_alive()?;
        if !contract!(
            self.active.is_none(),
            "destroy_texture inside begin_frame/end_frame"
        ) || !contract!(texture.id != self.white.id, "destroy of the white texture")
        {
            return Ok(());
        }
        self.device.destroy_texture(texture.id)
    }

    fn create_render_target(&mut self, desc: RenderTargetDesc) -> Result<RenderTargetHandle> {
        self.ensure_alive()?;
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "render target size {}x{}",
                desc.width, desc.height
            )));
        }
        let handle = RenderTargetHandle {
            id: RenderTargetId::next(),
            extent: RenderSize::new(desc.width, desc.height),
            texture: TextureHandle {
                id: TextureId::next(),
                width: desc.width,
                height: desc.height,
            },
        };
        self.device
            .create_render_target(handle.id, handle.texture.id, &desc)?;
        self.router.register(&handle, &desc);
        debug!(
            id = handle.id.raw(),
            width = desc.width,
            height = desc.height,
            "render target created"
        );
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) -> Result<()> {
        self.ensure_alive()?;
        if !contract!(
            self.active.is_none(),
            "destroy_render_target inside begin_frame/end_frame"
        ) {
            return Ok(());
        }
        if self.router.unregister(target.id) {
            self.device.destroy_render_target(target.id)?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.alive {
            return Ok(());
        }
        contract!(self.active.is_none(), "shutdown inside begin_frame/end_frame");
        self.device.wait_idle()?;
        self.device.shutdown();
        self.alive = false;
        info!("batch renderer shut down");
        Ok(())
    }
}
