// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use quadrant_core::init_tracing;
use quadrant_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::WindowId,
};
use quadrant_platform::{render_size, PlatformWindow};
use quadrant_render::{RenderError, RenderSize, RenderWindow, Renderer2D};
use tracing::{error, info, warn};

mod config;
mod demo;

use config::AppCfg;
use demo::Demo;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    Gl,
    Vk,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend
    #[arg(long, value_enum, default_value = "vk")]
    backend: BackendChoice,
    /// TOML config file; missing means defaults
    #[arg(long, default_value = config::DEFAULT_PATH)]
    config: PathBuf,
    /// Quads in the demo grid
    #[arg(long, default_value_t = 400)]
    quads: u32,
}

fn create_renderer(
    choice: BackendChoice,
    window: &Arc<PlatformWindow>,
    cfg: &AppCfg,
) -> Result<(Box<dyn Renderer2D>, &'static str)> {
    let rw: Arc<dyn RenderWindow> = window.clone();
    let settings = cfg.renderer_settings();
    if choice == BackendChoice::Vk {
        match quadrant_render_vk::create_renderer(rw.clone(), &settings, &cfg.vk_settings()) {
            Ok(r) => return Ok((Box::new(r), "vk")),
            Err(e) => error!("vk init failed: {e}; falling back to gl"),
        }
    }
    let r = quadrant_render_gl::create_renderer(rw, &settings, &cfg.gl_settings())?;
    Ok((Box::new(r), "gl"))
}

struct App {
    args: Args,
    cfg: AppCfg,
    window: Option<Arc<PlatformWindow>>,
    renderer: Option<Box<dyn Renderer2D>>,
    demo: Option<Demo>,
    size: RenderSize,
    paused: bool,
    started: Instant,
    frames: u32,
    last_report: Instant,
}

impl App {
    fn new(args: Args, cfg: AppCfg) -> Self {
        let now = Instant::now();
        Self {
            args,
            cfg,
            window: None,
            renderer: None,
            demo: None,
            size: RenderSize::default(),
            paused: false,
            started: now,
            frames: 0,
            last_report: now,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = PlatformWindow::create(event_loop, &w.title, w.width, w.height)?;
        let (mut renderer, name) = create_renderer(self.args.backend, &window, &self.cfg)?;
        info!("backend = {name}, vsync = {}", self.cfg.render.vsync);

        self.size = window.framebuffer_size();
        let demo = Demo::new(renderer.as_mut(), self.size, self.args.quads)?;
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.demo = Some(demo);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Some(demo) = self.demo.take() {
                match demo.destroy(renderer.as_mut()) {
                    Ok(()) | Err(RenderError::NotInitialized) => {}
                    Err(e) => warn!("demo teardown: {e}"),
                }
            }
            if let Err(e) = renderer.shutdown() {
                error!("renderer shutdown: {e}");
            }
        }
        self.window = None;
    }

    /// An error out of a frame ends the app.
    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(demo)) = (self.renderer.as_mut(), self.demo.as_mut()) else {
            return;
        };
        let t = self.started.elapsed().as_secs_f32();
        match demo.frame(renderer.as_mut(), t) {
            Ok(true) => self.frames = self.frames.saturating_add(1),
            Ok(false) => {}
            Err(e) => {
                error!("render error, exiting: {e}");
                self.shutdown();
                event_loop.exit();
            }
        }
    }

    fn report(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_report).as_secs_f32() < 1.0 {
            return;
        }
        if let Some(renderer) = self.renderer.as_mut() {
            let stats = renderer.stats();
            info!(
                fps = self.frames,
                draw_calls = stats.draw_calls,
                quads = stats.quad_count,
                vertices = stats.vertex_count(),
                indices = stats.index_count(),
                "frame stats"
            );
            renderer.reset_stats();
        }
        self.frames = 0;
        self.last_report = now;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("startup failed: {e:#}");
                event_loop.exit();
                return;
            }
        }
        self.paused = self.size.is_zero();
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                self.size = render_size(new_size);
                self.paused = self.size.is_zero();
                if self.paused {
                    info!("minimized, pausing");
                    return;
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.on_window_resize(self.size);
                }
                if let Some(demo) = self.demo.as_mut() {
                    demo.resize(self.size);
                }
            }
            WindowEvent::RedrawRequested => {
                if !self.paused {
                    self.redraw(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.paused || self.window.is_none() {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
        self.report();
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config::load_cfg(&args.config);
    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(args, cfg);
    event_loop.run_app(&mut app)?;
    Ok(())
}
