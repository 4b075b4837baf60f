// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use glow::HasContext as _;
use glutin::{
    config::ConfigTemplateBuilder,
    context::{ContextApi, ContextAttributesBuilder, PossiblyCurrentContext, Version},
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};
use quadrant_core::contract;
use quadrant_render::vertex::{quad_indices, AttributeFormat};
use quadrant_render::{
    Acquire, BatchLimits, FrameIndex, GpuDevice, ImageIndex, PassKind, PassTarget,
    PresentOutcome, QuadVertex, RenderError, RenderSize, RenderTargetDesc, RenderTargetId,
    RenderWindow, RendererSettings, ResolvedPass, Result, SealedBatch, TextureId,
    wait_for_drawable, MINIMIZED_POLL,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::program::compile_program;
use crate::GlSettings;

const MAX_SLOTS: u32 = 32;

enum TextureEntry {
    Owned(glow::Texture),
    Target(RenderTargetId),
}

struct GlTarget {
    fbo: glow::Framebuffer,
    color: glow::Texture,
    depth: glow::Renderbuffer,
}

/// OpenGL 3.3 implementation of [`GpuDevice`].
///
/// GL synchronizes implicitly: there is one presentable image and frame
/// waits are no-ops.
pub struct GlDevice {
    window: Arc<dyn RenderWindow>,
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    gl: glow::Context,
    size: RenderSize,
    frames_in_flight: usize,
    limits: BatchLimits,
    vsync: bool,

    program: glow::Program,
    u_view_projection: Option<glow::UniformLocation>,
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    ibo: glow::Buffer,

    textures: HashMap<TextureId, TextureEntry>,
    targets: HashMap<RenderTargetId, GlTarget>,
    recording: Option<FrameIndex>,
    pass: Option<PassTarget>,
    alive: bool,
}

fn non_zero(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v.max(1)).unwrap_or(NonZeroU32::MIN)
}

fn swap_interval(vsync: bool) -> SwapInterval {
    if vsync {
        SwapInterval::Wait(NonZeroU32::MIN)
    } else {
        SwapInterval::DontWait
    }
}

/// Component count and GL type of one vertex attribute.
fn gl_attribute(format: AttributeFormat) -> (i32, u32) {
    let ty = match format {
        AttributeFormat::UInt => glow::UNSIGNED_INT,
        _ => glow::FLOAT,
    };
    (format.components() as i32, ty)
}

fn make_current(
    display: &Display,
    window: &dyn RenderWindow,
    size: RenderSize,
) -> Result<(PossiblyCurrentContext, Surface<WindowSurface>, glow::Context)> {
    let wh = window
        .window_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();
    let template = ConfigTemplateBuilder::new()
        .with_depth_size(24)
        .with_alpha_size(8)
        .build();
    let mut configs = unsafe { display.find_configs(template) }.context("find_configs")?;
    let config = configs
        .next()
        .ok_or_else(|| RenderError::Unsupported("no GL config with a depth buffer".into()))?;

    let sattrs = SurfaceAttributesBuilder::<WindowSurface>::new()
        .with_srgb(Some(true))
        .build(wh, non_zero(size.width), non_zero(size.height));
    let surface = unsafe { display.create_window_surface(&config, &sattrs) }
        .context("create_window_surface")?;
    let ctx_attrs = ContextAttributesBuilder::new()
        .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
        .build(Some(wh));
    let not_current =
        unsafe { display.create_context(&config, &ctx_attrs) }.context("create_context")?;
    let context = not_current.make_current(&surface).context("make_current")?;

    let gl = unsafe {
        glow::Context::from_loader_function_cstr(|s| display.get_proc_address(s))
    };
    Ok((context, surface, gl))
}

impl GlDevice {
    pub fn new(
        window: Arc<dyn RenderWindow>,
        settings: &RendererSettings,
        gl_settings: &GlSettings,
    ) -> Result<Self> {
        let dh = window
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let display =
            unsafe { Display::new(dh, DisplayApiPreference::Egl) }.context("Display::new")?;
        let size = window.framebuffer_size();
        let (context, surface, gl) = make_current(&display, window.as_ref(), size)?;
        if let Err(e) = surface.set_swap_interval(&context, swap_interval(gl_settings.vsync)) {
            debug!("gl: swap interval not applied: {e}");
        }

        let units = unsafe { gl.get_parameter_i32(glow::MAX_TEXTURE_IMAGE_UNITS) };
        let slots = (units.max(1) as u32).min(MAX_SLOTS);
        let limits = settings.limits.constrain(BatchLimits {
            max_quads: settings.limits.max_quads,
            max_texture_slots: slots,
        });
        let program = compile_program(&gl, limits.max_texture_slots)?;

        let (vao, vbo, ibo) = unsafe {
            let vao = gl.create_vertex_array().map_err(anyhow::Error::msg)?;
            let vbo = gl.create_buffer().map_err(anyhow::Error::msg)?;
            let ibo = gl.create_buffer().map_err(anyhow::Error::msg)?;

            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_size(
                glow::ARRAY_BUFFER,
                (limits.max_vertices() * QuadVertex::STRIDE) as i32,
                glow::DYNAMIC_DRAW,
            );
            for attr in QuadVertex::ATTRIBUTES {
                let (components, ty) = gl_attribute(attr.format);
                gl.enable_vertex_attrib_array(attr.location);
                if ty == glow::FLOAT {
                    gl.vertex_attrib_pointer_f32(
                        attr.location,
                        components,
                        ty,
                        false,
                        QuadVertex::STRIDE as i32,
                        attr.offset as i32,
                    );
                } else {
                    gl.vertex_attrib_pointer_i32(
                        attr.location,
                        components,
                        ty,
                        QuadVertex::STRIDE as i32,
                        attr.offset as i32,
                    );
                }
            }
            let indices = quad_indices(limits.max_quads);
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ibo));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&indices),
                glow::STATIC_DRAW,
            );
            gl.bind_vertex_array(None);

            gl.enable(glow::FRAMEBUFFER_SRGB);
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(glow::LEQUAL);
            gl.disable(glow::CULL_FACE);
            (vao, vbo, ibo)
        };
        let u_view_projection = unsafe { gl.get_uniform_location(program, "u_ViewProjection") };

        info!(
            "gl: context ready ({}x{}, {} texture slots)",
            size.width, size.height, limits.max_texture_slots
        );

        Ok(Self {
            window,
            context,
            surface,
            gl,
            size,
            frames_in_flight: settings.frames_in_flight,
            limits,
            vsync: gl_settings.vsync,
            program,
            u_view_projection,
            vao,
            vbo,
            ibo,
            textures: HashMap::new(),
            targets: HashMap::new(),
            recording: None,
            pass: None,
            alive: true,
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive {
            Ok(())
        } else {
            Err(RenderError::NotInitialized)
        }
    }

    fn ensure_recording(&self, frame: FrameIndex) -> Result<()> {
        if contract!(
            self.recording == Some(frame),
            "frame {} is not recording",
            frame.get()
        ) {
            Ok(())
        } else {
            Err(RenderError::InvalidArgument(format!(
                "frame {} is not recording",
                frame.get()
            )))
        }
    }

    fn texture(&self, id: TextureId) -> Result<glow::Texture> {
        match self.textures.get(&id) {
            Some(TextureEntry::Owned(tex)) => Ok(*tex),
            Some(TextureEntry::Target(target)) => self
                .targets
                .get(target)
                .map(|t| t.color)
                .ok_or_else(|| RenderError::InvalidArgument(format!("render target {}", target.raw()))),
            None => Err(RenderError::InvalidArgument(format!(
                "unknown texture {}",
                id.raw()
            ))),
        }
    }

    unsafe fn new_texture(
        &self,
        internal_format: u32,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Result<glow::Texture> {
        let gl = &self.gl;
        unsafe {
            let tex = gl.create_texture().map_err(anyhow::Error::msg)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal_format as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(pixels),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
            Ok(tex)
        }
    }

    fn release(&mut self) {
        let gl = &self.gl;
        unsafe {
            gl.finish();
            for (_, entry) in self.textures.drain() {
                if let TextureEntry::Owned(tex) = entry {
                    gl.delete_texture(tex);
                }
            }
            for (_, target) in self.targets.drain() {
                gl.delete_framebuffer(target.fbo);
                gl.delete_renderbuffer(target.depth);
                gl.delete_texture(target.color);
            }
            gl.delete_buffer(self.ibo);
            gl.delete_buffer(self.vbo);
            gl.delete_vertex_array(self.vao);
            gl.delete_program(self.program);
        }
    }
}

impl GpuDevice for GlDevice {
    fn limits(&self) -> BatchLimits {
        self.limits
    }

    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn image_count(&self) -> usize {
        1
    }

    fn swapchain_extent(&self) -> RenderSize {
        self.size
    }

    fn wait_for_frame(&mut self, _frame: FrameIndex) -> Result<()> {
        self.ensure_alive()
    }

    fn reset_frame(&mut self, _frame: FrameIndex) -> Result<()> {
        self.ensure_alive()
    }

    fn acquire_image(&mut self, _frame: FrameIndex) -> Result<Acquire> {
        self.ensure_alive()?;
        let current = self.window.framebuffer_size();
        if current.is_zero() {
            return Ok(Acquire::Stale);
        }
        Ok(Acquire::Image {
            index: ImageIndex::new(0),
            suboptimal: current != self.size,
        })
    }

    fn begin_commands(&mut self, frame: FrameIndex, _image: ImageIndex) -> Result<()> {
        self.ensure_alive()?;
        contract!(
            self.recording.is_none(),
            "begin_commands while another frame is recording"
        );
        self.recording = Some(frame);
        Ok(())
    }

    fn begin_pass(&mut self, frame: FrameIndex, pass: &ResolvedPass) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_recording(frame)?;
        if !contract!(self.pass.is_none(), "begin_pass inside an open pass") {
            return Err(RenderError::InvalidArgument("nested render pass".into()));
        }
        let fbo = match pass.target {
            PassTarget::Swapchain(_) => None,
            PassTarget::Offscreen(id) => Some(
                self.targets
                    .get(&id)
                    .map(|t| t.fbo)
                    .ok_or_else(|| {
                        RenderError::InvalidArgument(format!("unknown render target {}", id.raw()))
                    })?,
            ),
        };
        let vp = pass.viewport;
        let c = pass.clear_color;
        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, fbo);
            gl.viewport(vp.x as i32, vp.y as i32, vp.width as i32, vp.height as i32);
            gl.depth_mask(true);
            match pass.kind {
                PassKind::Clear => {
                    gl.clear_color(c.x, c.y, c.z, c.w);
                    gl.clear_depth_f32(1.0);
                    gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
                }
                PassKind::Overlay => {
                    gl.clear_depth_f32(1.0);
                    gl.clear(glow::DEPTH_BUFFER_BIT);
                }
                PassKind::Draw => {}
            }
        }
        self.pass = Some(pass.target);
        Ok(())
    }

    fn draw_batch(&mut self, frame: FrameIndex, batch: &SealedBatch<'_>) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_recording(frame)?;
        let Some(target) = self.pass else {
            contract!(false, "draw_batch outside a render pass");
            return Err(RenderError::InvalidArgument("draw outside a render pass".into()));
        };
        if batch.index_count == 0 {
            return Ok(());
        }
        if let PassTarget::Offscreen(id) = target {
            let feedback = batch
                .textures
                .iter()
                .any(|t| matches!(self.textures.get(t), Some(TextureEntry::Target(o)) if *o == id));
            if !contract!(!feedback, "render target {} sampled while bound", id.raw()) {
                return Err(RenderError::InvalidArgument(
                    "render target sampled inside its own pass".into(),
                ));
            }
        }
        let bound = batch
            .textures
            .iter()
            .map(|&id| self.texture(id))
            .collect::<Result<Vec<_>>>()?;

        let gl = &self.gl;
        let vertex_bytes: &[u8] = bytemuck::cast_slice(batch.vertices);
        let view_projection = batch.view_projection.to_cols_array();
        unsafe {
            gl.use_program(Some(self.program));
            gl.uniform_matrix_4_f32_slice(self.u_view_projection.as_ref(), false, &view_projection);
            for (unit, tex) in bound.iter().enumerate() {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(glow::TEXTURE_2D, Some(*tex));
            }
            gl.bind_vertex_array(Some(self.vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            // orphan the previous batch's storage
            gl.buffer_data_size(
                glow::ARRAY_BUFFER,
                (self.limits.max_vertices() * QuadVertex::STRIDE) as i32,
                glow::DYNAMIC_DRAW,
            );
            gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, vertex_bytes);
            gl.draw_elements(
                glow::TRIANGLES,
                batch.index_count as i32,
                glow::UNSIGNED_INT,
                0,
            );
            gl.bind_vertex_array(None);
            gl.active_texture(glow::TEXTURE0);
        }
        Ok(())
    }

    fn end_pass(&mut self, frame: FrameIndex) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_recording(frame)?;
        if !contract!(self.pass.is_some(), "end_pass without begin_pass") {
            return Ok(());
        }
        if matches!(self.pass, Some(PassTarget::Offscreen(_))) {
            unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, None) };
        }
        self.pass = None;
        Ok(())
    }

    fn submit(&mut self, frame: FrameIndex, _image: ImageIndex) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_recording(frame)?;
        contract!(self.pass.is_none(), "submit with a render pass open");
        self.recording = None;
        unsafe { self.gl.flush() };
        Ok(())
    }

    fn present(&mut self, _frame: FrameIndex, _image: ImageIndex) -> Result<PresentOutcome> {
        self.ensure_alive()?;
        self.surface
            .swap_buffers(&self.context)
            .context("swap_buffers")?;
        if self.window.framebuffer_size() != self.size {
            return Ok(PresentOutcome::Suboptimal);
        }
        Ok(PresentOutcome::Presented)
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        self.ensure_alive()?;
        let current = wait_for_drawable(self.window.as_ref(), MINIMIZED_POLL);
        if current != size {
            debug!(
                "gl: window is {}x{}, requested {}x{}",
                current.width, current.height, size.width, size.height
            );
        }
        self.surface
            .resize(&self.context, non_zero(current.width), non_zero(current.height));
        if let Err(e) = self
            .surface
            .set_swap_interval(&self.context, swap_interval(self.vsync))
        {
            debug!("gl: swap interval not applied: {e}");
        }
        self.size = current;
        info!("gl: surface resized to {}x{}", current.width, current.height);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ensure_alive()?;
        unsafe { self.gl.finish() };
        Ok(())
    }

    fn create_texture(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<()> {
        self.ensure_alive()?;
        if self.textures.contains_key(&id) {
            return Err(RenderError::InvalidArgument(format!(
                "texture {} already exists",
                id.raw()
            )));
        }
        let tex = unsafe { self.new_texture(glow::SRGB8_ALPHA8, width, height, Some(rgba))? };
        self.textures.insert(id, TextureEntry::Owned(tex));
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        self.ensure_alive()?;
        match self.textures.get(&id) {
            None => Err(RenderError::InvalidArgument(format!(
                "unknown texture {}",
                id.raw()
            ))),
            Some(TextureEntry::Target(target)) => Err(RenderError::InvalidArgument(format!(
                "texture {} belongs to render target {}",
                id.raw(),
                target.raw()
            ))),
            Some(TextureEntry::Owned(_)) => {
                if let Some(TextureEntry::Owned(tex)) = self.textures.remove(&id) {
                    unsafe { self.gl.delete_texture(tex) };
                }
                Ok(())
            }
        }
    }

    fn create_render_target(
        &mut self,
        id: RenderTargetId,
        texture: TextureId,
        desc: &RenderTargetDesc,
    ) -> Result<()> {
        self.ensure_alive()?;
        let color = unsafe { self.new_texture(glow::RGBA8, desc.width, desc.height, None)? };
        let gl = &self.gl;
        let target = unsafe {
            let depth = gl.create_renderbuffer().map_err(anyhow::Error::msg)?;
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(depth));
            gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT24,
                desc.width as i32,
                desc.height as i32,
            );
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);

            let fbo = gl.create_framebuffer().map_err(anyhow::Error::msg)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(color),
                0,
            );
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                Some(depth),
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                gl.delete_renderbuffer(depth);
                gl.delete_texture(color);
                return Err(anyhow!("render target framebuffer incomplete: 0x{status:x}").into());
            }
            GlTarget { fbo, color, depth }
        };
        debug!("gl: render target {} ({}x{})", id.raw(), desc.width, desc.height);
        self.targets.insert(id, target);
        self.textures.insert(texture, TextureEntry::Target(id));
        Ok(())
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<()> {
        self.ensure_alive()?;
        let Some(target) = self.targets.remove(&id) else {
            return Err(RenderError::InvalidArgument(format!(
                "unknown render target {}",
                id.raw()
            )));
        };
        self.textures
            .retain(|_, entry| !matches!(entry, TextureEntry::Target(t) if *t == id));
        unsafe {
            self.gl.delete_framebuffer(target.fbo);
            self.gl.delete_renderbuffer(target.depth);
            self.gl.delete_texture(target.color);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        self.recording = None;
        self.pass = None;
        self.release();
        info!("gl: device destroyed");
    }
}

impl Drop for GlDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_is_an_integer_attribute() {
        let formats: Vec<_> = QuadVertex::ATTRIBUTES
            .iter()
            .map(|a| gl_attribute(a.format))
            .collect();
        assert_eq!(formats[0], (3, glow::FLOAT));
        assert_eq!(formats[1], (4, glow::FLOAT));
        assert_eq!(formats[5], (1, glow::UNSIGNED_INT));
    }

    #[test]
    fn zero_sizes_become_one() {
        assert_eq!(non_zero(0).get(), 1);
        assert_eq!(non_zero(640).get(), 640);
    }
}
