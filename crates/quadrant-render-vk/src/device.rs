// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use ash::khr::swapchain;
use ash::vk;
use quadrant_core::contract;
use quadrant_render::vertex::quad_indices;
use quadrant_render::{
    Acquire, BatchLimits, FrameIndex, GpuDevice, ImageIndex, PassKind, PassTarget,
    PresentOutcome, QuadVertex, RenderError, RenderSize, RenderTargetDesc, RenderTargetId,
    RenderWindow, RendererSettings, ResolvedPass, Result, SealedBatch, TextureId, Viewport,
    wait_for_drawable, MINIMIZED_POLL,
};
use tracing::{debug, info, warn};

use crate::buffer::{upload_via_staging, GpuBuffer};
use crate::context::VkContext;
use crate::frame::FrameSlot;
use crate::image::{create_sampler, create_texture, pick_depth_format, GpuImage};
use crate::passes::{clear_values, PassSet, PassSurface};
use crate::pipeline::{
    create_or_load_pipeline_cache, create_quad_pipeline, load_shader_code, pipeline_cache_path,
    save_pipeline_cache, QuadLayout, ShaderCode, TEXTURE_SLOTS,
};
use crate::swapchain::{query_surface, Swapchain, SwapchainConfig};
use crate::target::{OffscreenTarget, TARGET_COLOR_FORMAT};
use crate::VkSettings;


enum TextureEntry {
    Owned(GpuImage),
    /// Color attachment of a render target.
    Target(RenderTargetId),
}

#[derive(Clone, Copy)]
struct OpenPass {
    target: PassTarget,
}

#[derive(Clone, Copy)]
struct Recording {
    frame: FrameIndex,
    pass: Option<OpenPass>,
}

/// Vulkan implementation of [`GpuDevice`].
pub struct VkDevice2D {
    window: Arc<dyn RenderWindow>,
    settings: VkSettings,
    limits: BatchLimits,

    ctx: VkContext,
    swapchain_loader: swapchain::Device,
    swapchain: Swapchain,
    depth_format: vk::Format,

    screen_passes: PassSet,
    target_passes: PassSet,
    layout: QuadLayout,
    shaders: ShaderCode,
    screen_pipeline: vk::Pipeline,
    target_pipeline: vk::Pipeline,
    pipeline_cache: vk::PipelineCache,
    cache_path: PathBuf,

    cmd_pool: vk::CommandPool,
    frames: Vec<FrameSlot>,
    indices: GpuBuffer,
    sampler: vk::Sampler,

    textures: HashMap<TextureId, TextureEntry>,
    targets: HashMap<RenderTargetId, OffscreenTarget>,
    recording: Option<Recording>,
    alive: bool,
}

fn to_extent(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// Swapchain passes flip Y so +Y is up on screen. Offscreen passes keep row 0
/// at the bottom, which makes their textures sample upright.
fn vk_viewport(viewport: Viewport, target: PassTarget) -> vk::Viewport {
    let (y, height) = match target {
        PassTarget::Swapchain(_) => (viewport.y + viewport.height, -viewport.height),
        PassTarget::Offscreen(_) => (viewport.y, viewport.height),
    };
    vk::Viewport {
        x: viewport.x,
        y,
        width: viewport.width,
        height,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

impl VkDevice2D {
    pub fn new(
        window: Arc<dyn RenderWindow>,
        settings: &RendererSettings,
        vk_settings: &VkSettings,
    ) -> Result<Self> {
        // SAFETY: every handle below is created from `ctx` and destroyed in `shutdown`
        unsafe { Self::build(window, settings, vk_settings) }
    }

    unsafe fn build(
        window: Arc<dyn RenderWindow>,
        settings: &RendererSettings,
        vk_settings: &VkSettings,
    ) -> Result<Self> {
        let shaders = load_shader_code(vk_settings.shader_dir.as_deref())?;
        let ctx = unsafe { VkContext::new(window.as_ref())? };

        let sampler_limit = ctx.props.limits.max_per_stage_descriptor_samplers;
        if sampler_limit < TEXTURE_SLOTS {
            return Err(RenderError::Unsupported(format!(
                "device binds {sampler_limit} samplers per stage, {TEXTURE_SLOTS} required"
            )));
        }
        let limits = settings.limits.constrain(BatchLimits {
            max_quads: settings.limits.max_quads,
            max_texture_slots: TEXTURE_SLOTS,
        });

        let d = &ctx.device;
        let depth_format = unsafe { pick_depth_format(&ctx)? };
        let swapchain_loader = swapchain::Device::new(&ctx.instance, d);
        let choice = unsafe {
            query_surface(
                &ctx,
                SwapchainConfig {
                    hint: window.framebuffer_size(),
                    vsync: vk_settings.vsync,
                    vsync_mode: vk_settings.vsync_mode,
                },
            )?
        };

        let screen_passes =
            unsafe { PassSet::new(d, PassSurface::Swapchain, choice.format.format, depth_format)? };
        let target_passes =
            unsafe { PassSet::new(d, PassSurface::Offscreen, TARGET_COLOR_FORMAT, depth_format)? };
        let layout = unsafe { QuadLayout::new(d)? };
        let cache_path = pipeline_cache_path(&ctx.props);
        let pipeline_cache = unsafe { create_or_load_pipeline_cache(d, &cache_path)? };
        let screen_pipeline = unsafe {
            create_quad_pipeline(d, pipeline_cache, &layout, screen_passes.compatible(), &shaders)?
        };
        let target_pipeline = unsafe {
            create_quad_pipeline(d, pipeline_cache, &layout, target_passes.compatible(), &shaders)?
        };

        let swapchain = unsafe {
            Swapchain::new(
                &ctx,
                &swapchain_loader,
                &choice,
                &screen_passes,
                depth_format,
                vk::SwapchainKHR::null(),
            )?
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: ctx.queue_family,
            ..Default::default()
        };
        let cmd_pool =
            unsafe { d.create_command_pool(&pool_info, None) }.context("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: settings.frames_in_flight as u32,
            ..Default::default()
        };
        let cmd_bufs =
            unsafe { d.allocate_command_buffers(&alloc_info) }.context("allocate_command_buffers")?;
        let chunk_bytes = limits.max_vertices() as vk::DeviceSize * QuadVertex::STRIDE as vk::DeviceSize;
        let mut frames = Vec::with_capacity(cmd_bufs.len());
        for cmd in cmd_bufs {
            frames.push(unsafe { FrameSlot::new(d, cmd, chunk_bytes)? });
        }

        let index_data = quad_indices(limits.max_quads);
        let index_bytes: &[u8] = bytemuck::cast_slice(&index_data);
        let indices = unsafe {
            GpuBuffer::new(
                &ctx,
                index_bytes.len() as vk::DeviceSize,
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?
        };
        unsafe { upload_via_staging(&ctx, cmd_pool, indices.buffer, index_bytes)? };
        let sampler = unsafe { create_sampler(d)? };

        info!(
            frames_in_flight = frames.len(),
            images = swapchain.images.len(),
            max_quads = limits.max_quads,
            "vk: device ready"
        );

        Ok(Self {
            window,
            settings: vk_settings.clone(),
            limits,
            ctx,
            swapchain_loader,
            swapchain,
            depth_format,
            screen_passes,
            target_passes,
            layout,
            shaders,
            screen_pipeline,
            target_pipeline,
            pipeline_cache,
            cache_path,
            cmd_pool,
            frames,
            indices,
            sampler,
            textures: HashMap::new(),
            targets: HashMap::new(),
            recording: None,
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

    fn slot(&self, frame: FrameIndex) -> Result<&FrameSlot> {
        self.frames.get(frame.get()).ok_or_else(|| {
            RenderError::InvalidArgument(format!("frame {} out of range", frame.get()))
        })
    }

    /// The recording for `frame`, or an error after logging a contract violation.
    fn recording(&self, frame: FrameIndex) -> Result<Recording> {
        match self.recording.filter(|r| r.frame == frame) {
            Some(rec) => Ok(rec),
            None => {
                contract!(false, "frame {} is not recording", frame.get());
                Err(RenderError::InvalidArgument(format!(
                    "frame {} is not recording",
                    frame.get()
                )))
            }
        }
    }

    fn texture_view(&self, id: TextureId) -> Result<vk::ImageView> {
        match self.textures.get(&id) {
            Some(TextureEntry::Owned(image)) => Ok(image.view),
            Some(TextureEntry::Target(target)) => self
                .targets
                .get(target)
                .map(|t| t.color.view)
                .ok_or_else(|| RenderError::InvalidArgument(format!("render target {}", target.raw()))),
            None => Err(RenderError::InvalidArgument(format!(
                "unknown texture {}",
                id.raw()
            ))),
        }
    }

    /// True if `id` aliases the color attachment of `target`.
    fn is_target_texture(&self, id: TextureId, target: RenderTargetId) -> bool {
        matches!(self.textures.get(&id), Some(TextureEntry::Target(t)) if *t == target)
    }

    /// Waits for a drawable size. Minimized windows report zero.
    fn current_size(&self, hint: RenderSize) -> RenderSize {
        let size = wait_for_drawable(self.window.as_ref(), MINIMIZED_POLL);
        if size != hint {
            debug!(
                "vk: window is {}x{}, requested {}x{}",
                size.width, size.height, hint.width, hint.height
            );
        }
        size
    }

    // STRICT ORDER (recreate):
    // 1) device idle (caller waited, repeat is cheap)
    // 2) rebuild swapchain passes + pipeline ONLY if the surface format changed
    // 3) create the NEW swapchain from the old handle
    // 4) destroy the OLD swapchain and everything sized to it
    unsafe fn rebuild_swapchain(&mut self, hint: RenderSize) -> Result<()> {
        let size = self.current_size(hint);
        let d = &self.ctx.device;
        unsafe { d.device_wait_idle() }.context("device_wait_idle")?;

        let choice = unsafe {
            query_surface(
                &self.ctx,
                SwapchainConfig {
                    hint: size,
                    vsync: self.settings.vsync,
                    vsync_mode: self.settings.vsync_mode,
                },
            )?
        };

        if choice.format.format != self.screen_passes.color_format {
            info!("vk: surface format changed, rebuilding swapchain pipeline");
            let mut passes = unsafe {
                PassSet::new(d, PassSurface::Swapchain, choice.format.format, self.depth_format)?
            };
            let pipeline = match unsafe {
                create_quad_pipeline(
                    d,
                    self.pipeline_cache,
                    &self.layout,
                    passes.compatible(),
                    &self.shaders,
                )
            } {
                Ok(p) => p,
                Err(e) => {
                    unsafe { passes.destroy(d) };
                    return Err(e);
                }
            };
            unsafe {
                d.destroy_pipeline(self.screen_pipeline, None);
                self.screen_passes.destroy(d);
            }
            self.screen_passes = passes;
            self.screen_pipeline = pipeline;
        }

        let fresh = unsafe {
            Swapchain::new(
                &self.ctx,
                &self.swapchain_loader,
                &choice,
                &self.screen_passes,
                self.depth_format,
                self.swapchain.handle,
            )?
        };
        let mut old = std::mem::replace(&mut self.swapchain, fresh);
        unsafe { old.destroy(&self.ctx.device, &self.swapchain_loader) };
        Ok(())
    }

    // STRICT TEARDOWN ORDER:
    // - device_wait_idle()
    // - save the pipeline cache while the device is alive
    // - textures, targets, frame scratch, index buffer
    // - pipelines/layouts/passes BEFORE swapchain
    // - free command buffers with their pool
    // - swapchain BEFORE device; surface AFTER device; instance last (VkContext::destroy)
    unsafe fn teardown(&mut self) {
        let d = &self.ctx.device;
        unsafe {
            d.device_wait_idle().ok();
            if let Err(e) = save_pipeline_cache(d, self.pipeline_cache, &self.cache_path) {
                warn!("vk: pipeline cache not saved: {e}");
            }
            d.destroy_pipeline_cache(self.pipeline_cache, None);

            for (_, entry) in self.textures.drain() {
                if let TextureEntry::Owned(mut image) = entry {
                    image.destroy(d);
                }
            }
            for (_, mut target) in self.targets.drain() {
                target.destroy(d);
            }
            for mut frame in self.frames.drain(..) {
                frame.destroy(d);
            }
            self.indices.destroy(d);
            d.destroy_sampler(self.sampler, None);

            d.destroy_pipeline(self.screen_pipeline, None);
            d.destroy_pipeline(self.target_pipeline, None);
            self.layout.destroy(d);
            self.screen_passes.destroy(d);
            self.target_passes.destroy(d);

            d.destroy_command_pool(self.cmd_pool, None);
            self.swapchain.destroy(d, &self.swapchain_loader);
            self.ctx.destroy();
        }
    }
}

impl GpuDevice for VkDevice2D {
    fn limits(&self) -> BatchLimits {
        self.limits
    }

    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    fn swapchain_extent(&self) -> RenderSize {
        self.swapchain.size()
    }

    fn wait_for_frame(&mut self, frame: FrameIndex) -> Result<()> {
        self.ensure_alive()?;
        let fence = self.slot(frame)?.in_flight;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("wait_for_fences(in_flight)")?;
        Ok(())
    }

    fn reset_frame(&mut self, frame: FrameIndex) -> Result<()> {
        self.ensure_alive()?;
        let fence = self.slot(frame)?.in_flight;
        unsafe { self.ctx.device.reset_fences(&[fence]) }.context("reset_fences")?;
        Ok(())
    }

    fn acquire_image(&mut self, frame: FrameIndex) -> Result<Acquire> {
        self.ensure_alive()?;
        let sem = self.slot(frame)?.image_available;
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                sem,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquire::Image {
                index: ImageIndex::new(index),
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
            Err(e) => Err(anyhow::anyhow!("acquire_next_image: {e:?}").into()),
        }
    }

    fn begin_commands(&mut self, frame: FrameIndex, _image: ImageIndex) -> Result<()> {
        self.ensure_alive()?;
        contract!(
            self.recording.is_none(),
            "begin_commands while another frame is recording"
        );
        let d = &self.ctx.device;
        let slot = self.frames.get_mut(frame.get()).ok_or_else(|| {
            RenderError::InvalidArgument(format!("frame {} out of range", frame.get()))
        })?;
        unsafe {
            slot.recycle(d)?;
            d.reset_command_buffer(slot.cmd, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(slot.cmd, &begin)
                .context("begin_command_buffer")?;
        }
        self.recording = Some(Recording { frame, pass: None });
        Ok(())
    }

    fn begin_pass(&mut self, frame: FrameIndex, pass: &ResolvedPass) -> Result<()> {
        self.ensure_alive()?;
        let mut rec = self.recording(frame)?;
        if !contract!(rec.pass.is_none(), "begin_pass inside an open pass") {
            return Err(RenderError::InvalidArgument("nested render pass".into()));
        }

        let (render_pass, framebuffer, pipeline) = match pass.target {
            PassTarget::Swapchain(image) => {
                let fb = self
                    .swapchain
                    .framebuffers
                    .get(image.slot())
                    .copied()
                    .ok_or_else(|| {
                        RenderError::InvalidArgument(format!("image {} out of range", image.get()))
                    })?;
                (self.screen_passes.get(pass.kind), fb, self.screen_pipeline)
            }
            PassTarget::Offscreen(id) => {
                let target = self.targets.get(&id).ok_or_else(|| {
                    RenderError::InvalidArgument(format!("unknown render target {}", id.raw()))
                })?;
                let kind = match pass.kind {
                    // offscreen targets are never presented
                    PassKind::Overlay => PassKind::Draw,
                    kind => kind,
                };
                (self.target_passes.get(kind), target.framebuffer, self.target_pipeline)
            }
        };

        let extent = to_extent(pass.extent);
        let clears = clear_values(pass.clear_color.to_array());
        let cmd = self.slot(frame)?.cmd;
        let d = &self.ctx.device;
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        let viewport = vk_viewport(pass.viewport, pass.target);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[scissor]);
        }

        rec.pass = Some(OpenPass {
            target: pass.target,
        });
        self.recording = Some(rec);
        Ok(())
    }

    fn draw_batch(&mut self, frame: FrameIndex, batch: &SealedBatch<'_>) -> Result<()> {
        self.ensure_alive()?;
        let rec = self.recording(frame)?;
        let Some(open) = rec.pass else {
            contract!(false, "draw_batch outside a render pass");
            return Err(RenderError::InvalidArgument("draw outside a render pass".into()));
        };
        if batch.index_count == 0 {
            return Ok(());
        }
        let Some(&fallback) = batch.textures.first() else {
            return Err(RenderError::InvalidArgument("batch without texture slots".into()));
        };
        if let PassTarget::Offscreen(target) = open.target {
            let feedback = batch.textures.iter().any(|&t| self.is_target_texture(t, target));
            if !contract!(!feedback, "render target {} sampled while bound", target.raw()) {
                return Err(RenderError::InvalidArgument(
                    "render target sampled inside its own pass".into(),
                ));
            }
        }

        let mut image_infos = [vk::DescriptorImageInfo::default(); TEXTURE_SLOTS as usize];
        for (i, info) in image_infos.iter_mut().enumerate() {
            let id = batch.textures.get(i).copied().unwrap_or(fallback);
            *info = vk::DescriptorImageInfo {
                sampler: self.sampler,
                image_view: self.texture_view(id)?,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            };
        }

        let d = &self.ctx.device;
        let set_layout = self.layout.set_layout;
        let slot = self.frames.get_mut(frame.get()).ok_or_else(|| {
            RenderError::InvalidArgument(format!("frame {} out of range", frame.get()))
        })?;
        let cmd = slot.cmd;
        let vertex_bytes: &[u8] = bytemuck::cast_slice(batch.vertices);
        let (vbuf, voffset) = unsafe { slot.vertices.push(&self.ctx, vertex_bytes)? };
        let set = unsafe { slot.descriptors.allocate(d, set_layout)? };

        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            dst_array_element: 0,
            descriptor_count: image_infos.len() as u32,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: image_infos.as_ptr(),
            ..Default::default()
        };
        let view_projection = batch.view_projection.to_cols_array();
        unsafe {
            d.update_descriptor_sets(std::slice::from_ref(&write), &[]);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout.pipeline_layout,
                0,
                &[set],
                &[],
            );
            d.cmd_push_constants(
                cmd,
                self.layout.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::cast_slice(&view_projection),
            );
            d.cmd_bind_vertex_buffers(cmd, 0, &[vbuf], &[voffset]);
            d.cmd_bind_index_buffer(cmd, self.indices.buffer, 0, vk::IndexType::UINT32);
            d.cmd_draw_indexed(cmd, batch.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    fn end_pass(&mut self, frame: FrameIndex) -> Result<()> {
        self.ensure_alive()?;
        let mut rec = self.recording(frame)?;
        if !contract!(rec.pass.is_some(), "end_pass without begin_pass") {
            return Ok(());
        }
        let cmd = self.slot(frame)?.cmd;
        unsafe { self.ctx.device.cmd_end_render_pass(cmd) };
        rec.pass = None;
        self.recording = Some(rec);
        Ok(())
    }

    // STRICT PER-FRAME ORDER:
    // 1) acquire_next_image signals the frame's image_available
    // 2) queue_submit waits on it, signals render_finished for THIS image, fences the frame
    // 3) queue_present waits on render_finished
    // render_finished is per image; image_available is per frame. Do not cross-use.
    fn submit(&mut self, frame: FrameIndex, image: ImageIndex) -> Result<()> {
        self.ensure_alive()?;
        let rec = self.recording(frame)?;
        contract!(rec.pass.is_none(), "submit with a render pass open");
        self.recording = None;

        let slot = self.slot(frame)?;
        let (cmd, wait_sem, fence) = (slot.cmd, slot.image_available, slot.in_flight);
        let signal_sem = *self.swapchain.render_finished.get(image.slot()).ok_or_else(|| {
            RenderError::InvalidArgument(format!("image {} out of range", image.get()))
        })?;
        let d = &self.ctx.device;
        unsafe { d.end_command_buffer(cmd) }.context("end_command_buffer")?;

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait_sem,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal_sem,
            ..Default::default()
        };
        unsafe { d.queue_submit(self.ctx.queue, std::slice::from_ref(&submit), fence) }
            .context("queue_submit")?;
        Ok(())
    }

    fn present(&mut self, _frame: FrameIndex, image: ImageIndex) -> Result<PresentOutcome> {
        self.ensure_alive()?;
        let wait_sem = *self.swapchain.render_finished.get(image.slot()).ok_or_else(|| {
            RenderError::InvalidArgument(format!("image {} out of range", image.get()))
        })?;
        let index = image.get();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait_sem,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.ctx.queue, &present) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(anyhow::anyhow!("queue_present: {e:?}").into()),
        }
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        self.ensure_alive()?;
        contract!(
            self.recording.is_none(),
            "swapchain recreated while a frame is recording"
        );
        unsafe { self.rebuild_swapchain(size) }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ensure_alive()?;
        unsafe { self.ctx.device.device_wait_idle() }.context("device_wait_idle")?;
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
        let image = unsafe { create_texture(&self.ctx, self.cmd_pool, width, height, rgba)? };
        self.textures.insert(id, TextureEntry::Owned(image));
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
                // earlier frames may still sample it
                self.wait_idle()?;
                if let Some(TextureEntry::Owned(mut image)) = self.textures.remove(&id) {
                    unsafe { image.destroy(&self.ctx.device) };
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
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let target = unsafe {
            OffscreenTarget::new(
                &self.ctx,
                self.cmd_pool,
                &self.target_passes,
                self.depth_format,
                extent,
            )?
        };
        debug!(
            "vk: render target {} ({}x{})",
            id.raw(),
            target.extent().width,
            target.extent().height
        );
        self.targets.insert(id, target);
        self.textures.insert(texture, TextureEntry::Target(id));
        Ok(())
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<()> {
        self.ensure_alive()?;
        if !self.targets.contains_key(&id) {
            return Err(RenderError::InvalidArgument(format!(
                "unknown render target {}",
                id.raw()
            )));
        }
        self.wait_idle()?;
        self.textures
            .retain(|_, entry| !matches!(entry, TextureEntry::Target(t) if *t == id));
        if let Some(mut target) = self.targets.remove(&id) {
            unsafe { target.destroy(&self.ctx.device) };
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        self.recording = None;
        unsafe { self.teardown() };
        info!("vk: device destroyed");
    }
}

impl Drop for VkDevice2D {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_viewport_is_flipped() {
        let vp = Viewport::from_extent(RenderSize::new(800, 600));
        let v = vk_viewport(vp, PassTarget::Swapchain(ImageIndex::new(0)));
        assert_eq!((v.y, v.height), (600.0, -600.0));
        assert_eq!(v.width, 800.0);
    }

    #[test]
    fn offscreen_viewport_is_not_flipped() {
        let vp = Viewport::from_extent(RenderSize::new(256, 128));
        let v = vk_viewport(vp, PassTarget::Offscreen(RenderTargetId::next()));
        assert_eq!((v.y, v.height), (0.0, 128.0));
    }
}
