// SPDX-License-Identifier: CEPL-1.0
//! A [`GpuDevice`] that records calls instead of talking to a GPU.
//!
//! Fences are simulated per ring slot: `submit` leaves a fence pending and
//! `wait_for_frame` (or `wait_idle`) completes it. Sequencing mistakes that
//! would be hazards on a real device are collected as violations rather than
//! panicking, so tests can assert on them.
use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use quadrant_render::{
    Acquire, BatchLimits, FrameIndex, GpuDevice, ImageIndex, PresentOutcome, RenderSize,
    RenderTargetDesc, RenderTargetId, ResolvedPass, Result, SealedBatch, TextureId,
};

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    WaitForFrame(FrameIndex),
    ResetFrame(FrameIndex),
    Acquire {
        frame: FrameIndex,
        image: Option<ImageIndex>,
    },
    BeginCommands {
        frame: FrameIndex,
        image: ImageIndex,
    },
    BeginPass {
        frame: FrameIndex,
        pass: ResolvedPass,
    },
    DrawBatch {
        frame: FrameIndex,
        quads: u32,
        index_count: u32,
        textures: Vec<TextureId>,
    },
    EndPass(FrameIndex),
    Submit {
        frame: FrameIndex,
        image: ImageIndex,
    },
    Present {
        frame: FrameIndex,
        image: ImageIndex,
    },
    WaitIdle,
    RecreateSwapchain(RenderSize),
    CreateTexture(TextureId),
    DestroyTexture(TextureId),
    CreateRenderTarget(RenderTargetId),
    DestroyRenderTarget(RenderTargetId),
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Reset,
    Pending,
}

#[derive(Clone, Debug)]
pub struct MockConfig {
    pub frames_in_flight: usize,
    pub image_count: usize,
    pub extent: RenderSize,
    pub limits: BatchLimits,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            image_count: 3,
            extent: RenderSize::new(800, 600),
            limits: BatchLimits::default(),
        }
    }
}

struct MockState {
    calls: Vec<DeviceCall>,
    violations: Vec<String>,
    fences: Vec<FenceState>,
    /// Image-indexed: the frame whose submission last used the image.
    image_fence: Vec<Option<FrameIndex>>,
    /// Acquired and not yet presented.
    held: Vec<bool>,
    next_image: usize,
    extent: RenderSize,
    recreate_image_count: Option<usize>,
    acquire_script: VecDeque<Acquire>,
    present_script: VecDeque<PresentOutcome>,
    fail_draws: usize,
    pass_open: bool,
    textures: Vec<TextureId>,
}

impl MockState {
    fn violation(&mut self, msg: String) {
        self.violations.push(msg);
    }
}

/// Shared view of a [`MockDevice`] that stays with the test after the device
/// moved into a renderer.
#[derive(Clone)]
pub struct MockLog(Arc<Mutex<MockState>>);

impl MockLog {
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.0.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.lock().calls.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.0.lock().violations.clone()
    }

    pub fn pending_fences(&self) -> usize {
        self.0
            .lock()
            .fences
            .iter()
            .filter(|f| **f == FenceState::Pending)
            .count()
    }

    pub fn fence(&self, frame: FrameIndex) -> FenceState {
        self.0.lock().fences[frame.get()]
    }

    pub fn held_images(&self) -> Vec<ImageIndex> {
        self.0
            .lock()
            .held
            .iter()
            .enumerate()
            .filter(|(_, h)| **h)
            .map(|(i, _)| ImageIndex::new(i as u32))
            .collect()
    }

    pub fn live_textures(&self) -> usize {
        self.0.lock().textures.len()
    }

    /// The next acquisition reports a stale surface.
    pub fn fail_next_acquire(&self) {
        self.script_acquire(Acquire::Stale);
    }

    /// Queued acquisition results, consumed one per `acquire_image`.
    pub fn script_acquire(&self, outcome: Acquire) {
        self.0.lock().acquire_script.push_back(outcome);
    }

    /// The next `draw_batch` fails the way a lost device does.
    pub fn fail_next_draw(&self) {
        self.0.lock().fail_draws += 1;
    }

    pub fn script_present(&self, outcome: PresentOutcome) {
        self.0.lock().present_script.push_back(outcome);
    }

    /// Image count and extent the swapchain takes on its next rebuild.
    pub fn on_recreate(&self, image_count: usize, extent: RenderSize) {
        let mut s = self.0.lock();
        s.recreate_image_count = Some(image_count);
        s.extent = extent;
    }

    pub fn draw_batches(&self) -> Vec<(u32, Vec<TextureId>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::DrawBatch {
                    quads, textures, ..
                } => Some((quads, textures)),
                _ => None,
            })
            .collect()
    }

    pub fn passes(&self) -> Vec<ResolvedPass> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::BeginPass { pass, .. } => Some(pass),
                _ => None,
            })
            .collect()
    }
}

pub struct MockDevice {
    config: MockConfig,
    image_count: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new(config: MockConfig) -> (Self, MockLog) {
        let state = Arc::new(Mutex::new(MockState {
            calls: Vec::new(),
            violations: Vec::new(),
            fences: vec![FenceState::Signaled; config.frames_in_flight],
            image_fence: vec![None; config.image_count],
            held: vec![false; config.image_count],
            next_image: 0,
            extent: config.extent,
            recreate_image_count: None,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_draws: 0,
            pass_open: false,
            textures: Vec::new(),
        }));
        let log = MockLog(Arc::clone(&state));
        let image_count = config.image_count;
        (
            Self {
                config,
                image_count,
                state,
            },
            log,
        )
    }
}

impl GpuDevice for MockDevice {
    fn limits(&self) -> BatchLimits {
        self.config.limits
    }

    fn frames_in_flight(&self) -> usize {
        self.config.frames_in_flight
    }

    fn image_count(&self) -> usize {
        self.image_count
    }

    fn swapchain_extent(&self) -> RenderSize {
        self.state.lock().extent
    }

    fn wait_for_frame(&mut self, frame: FrameIndex) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::WaitForFrame(frame));
        let fence = s.fences[frame.get()];
        if fence == FenceState::Reset {
            s.violation(format!("wait on unsubmitted reset fence {}", frame.get()));
        } else {
            s.fences[frame.get()] = FenceState::Signaled;
        }
        Ok(())
    }

    fn reset_frame(&mut self, frame: FrameIndex) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::ResetFrame(frame));
        if s.fences[frame.get()] == FenceState::Pending {
            s.violation(format!("reset of pending fence {}", frame.get()));
        }
        s.fences[frame.get()] = FenceState::Reset;
        Ok(())
    }

    fn acquire_image(&mut self, frame: FrameIndex) -> Result<Acquire> {
        let mut s = self.state.lock();
        match s.acquire_script.pop_front() {
            Some(Acquire::Stale) => {
                s.calls.push(DeviceCall::Acquire { frame, image: None });
                return Ok(Acquire::Stale);
            }
            Some(Acquire::Image { index, suboptimal }) => {
                if s.held[index.slot()] {
                    s.violation(format!("scripted image {} is already held", index.get()));
                }
                s.held[index.slot()] = true;
                s.next_image = (index.slot() + 1) % s.held.len();
                s.calls.push(DeviceCall::Acquire {
                    frame,
                    image: Some(index),
                });
                return Ok(Acquire::Image { index, suboptimal });
            }
            None => {}
        }
        let count = s.held.len();
        let start = s.next_image;
        let free = (0..count).find(|o| !s.held[(start + o) % count]);
        let Some(offset) = free else {
            s.violation("acquire with every image held".to_owned());
            return Ok(Acquire::Stale);
        };
        let index = (start + offset) % count;
        s.next_image = (index + 1) % count;
        s.held[index] = true;
        let image = ImageIndex::new(index as u32);
        s.calls.push(DeviceCall::Acquire {
            frame,
            image: Some(image),
        });
        Ok(Acquire::Image {
            index: image,
            suboptimal: false,
        })
    }

    fn begin_commands(&mut self, frame: FrameIndex, image: ImageIndex) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::BeginCommands { frame, image });
        if s.fences[frame.get()] == FenceState::Pending {
            s.violation(format!("recording frame {} while in flight", frame.get()));
        }
        let owner = s.image_fence[image.slot()];
        if let Some(owner) = owner {
            if owner != frame && s.fences[owner.get()] == FenceState::Pending {
                s.violation(format!(
                    "image {} still in flight under frame {}",
                    image.get(),
                    owner.get()
                ));
            }
        }
        Ok(())
    }

    fn begin_pass(&mut self, frame: FrameIndex, pass: &ResolvedPass) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::BeginPass { frame, pass: *pass });
        if s.pass_open {
            s.violation("nested render pass".to_owned());
        }
        s.pass_open = true;
        Ok(())
    }

    fn draw_batch(&mut self, frame: FrameIndex, batch: &SealedBatch<'_>) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::DrawBatch {
            frame,
            quads: batch.vertices.len() as u32 / 4,
            index_count: batch.index_count,
            textures: batch.textures.to_vec(),
        });
        if s.fail_draws > 0 {
            s.fail_draws -= 1;
            return Err(anyhow!("device lost").into());
        }
        if !s.pass_open {
            s.violation("draw outside a render pass".to_owned());
        }
        if batch.vertices.len() as u32 / 4 * 6 != batch.index_count {
            s.violation("vertex and index counts disagree".to_owned());
        }
        Ok(())
    }

    fn end_pass(&mut self, frame: FrameIndex) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::EndPass(frame));
        if !s.pass_open {
            s.violation("end_pass without begin_pass".to_owned());
        }
        s.pass_open = false;
        Ok(())
    }

    fn submit(&mut self, frame: FrameIndex, image: ImageIndex) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::Submit { frame, image });
        if s.pass_open {
            s.violation("submit with an open render pass".to_owned());
        }
        if s.fences[frame.get()] != FenceState::Reset {
            s.violation(format!("submit without resetting fence {}", frame.get()));
        }
        s.fences[frame.get()] = FenceState::Pending;
        s.image_fence[image.slot()] = Some(frame);
        Ok(())
    }

    fn present(&mut self, frame: FrameIndex, image: ImageIndex) -> Result<PresentOutcome> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::Present { frame, image });
        s.held[image.slot()] = false;
        Ok(s.present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::RecreateSwapchain(size));
        if s.fences.contains(&FenceState::Pending) {
            s.violation("swapchain rebuilt while frames are in flight".to_owned());
        }
        if let Some(count) = s.recreate_image_count.take() {
            self.image_count = count;
        }
        let count = self.image_count;
        s.held = vec![false; count];
        s.image_fence = vec![None; count];
        s.next_image = 0;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::WaitIdle);
        for fence in &mut s.fences {
            if *fence == FenceState::Pending {
                *fence = FenceState::Signaled;
            }
        }
        Ok(())
    }

    fn create_texture(
        &mut self,
        id: TextureId,
        _width: u32,
        _height: u32,
        _rgba: &[u8],
    ) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::CreateTexture(id));
        s.textures.push(id);
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::DestroyTexture(id));
        s.textures.retain(|t| *t != id);
        Ok(())
    }

    fn create_render_target(
        &mut self,
        id: RenderTargetId,
        texture: TextureId,
        _desc: &RenderTargetDesc,
    ) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::CreateRenderTarget(id));
        s.textures.push(texture);
        Ok(())
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<()> {
        self.state
            .lock()
            .calls
            .push(DeviceCall::DestroyRenderTarget(id));
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut s = self.state.lock();
        s.calls.push(DeviceCall::Shutdown);
        s.textures.clear();
    }
}
