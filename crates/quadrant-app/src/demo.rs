// SPDX-License-Identifier: CEPL-1.0
//! The scene the app draws every frame: a grid of quads on screen plus a
//! spinning quad rendered offscreen and shown as a texture.
use quadrant_math::OrthoCamera;
use quadrant_render::{
    RenderSize, RenderTargetDesc, RenderTargetHandle, Renderer2D, Result, TextureHandle, Vec2,
    Vec3, Vec4,
};

const CHECKER_SIZE: u32 = 64;
const CHECKER_CELL: u32 = 8;
const TARGET_SIZE: u32 = 256;
const ZOOM: f32 = 1.0;

/// RGBA8 checkerboard, `cell` pixels per square.
pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Vec<u8> {
    let cell = cell.max(1);
    let mut out = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let even = ((x / cell) + (y / cell)) % 2 == 0;
            out.extend_from_slice(if even { &a } else { &b });
        }
    }
    out
}

/// Smallest square grid with room for `count` cells.
pub fn grid_side(count: u32) -> u32 {
    let mut side = 0;
    while side * side < count {
        side += 1;
    }
    side
}

fn aspect(size: RenderSize) -> f32 {
    if size.is_zero() {
        1.0
    } else {
        size.width as f32 / size.height as f32
    }
}

pub struct Demo {
    camera: OrthoCamera,
    target_camera: OrthoCamera,
    checker: TextureHandle,
    target: RenderTargetHandle,
    quads: u32,
}

impl Demo {
    pub fn new(renderer: &mut dyn Renderer2D, size: RenderSize, quads: u32) -> Result<Self> {
        let pixels = checkerboard(
            CHECKER_SIZE,
            CHECKER_CELL,
            [0xee, 0xee, 0xee, 0xff],
            [0x30, 0x30, 0x38, 0xff],
        );
        let checker = renderer.create_texture(CHECKER_SIZE, CHECKER_SIZE, &pixels)?;
        let target = renderer.create_render_target(RenderTargetDesc {
            width: TARGET_SIZE,
            height: TARGET_SIZE,
            clear_color: Vec4::new(0.1, 0.1, 0.2, 1.0),
        })?;
        let a = aspect(size);
        Ok(Self {
            camera: OrthoCamera::new(-a * ZOOM, a * ZOOM, -ZOOM, ZOOM),
            target_camera: OrthoCamera::new(-1.0, 1.0, -1.0, 1.0),
            checker,
            target,
            quads,
        })
    }

    pub fn resize(&mut self, size: RenderSize) {
        let a = aspect(size);
        self.camera.set_projection(-a * ZOOM, a * ZOOM, -ZOOM, ZOOM);
    }

    /// Returns `Ok(false)` when the frame was skipped or not presented.
    pub fn frame(&mut self, renderer: &mut dyn Renderer2D, t: f32) -> Result<bool> {
        if !renderer.begin_frame()? {
            return Ok(false);
        }

        renderer.set_render_target(&self.target)?;
        renderer.clear()?;
        renderer.begin_scene(self.target_camera.view_projection())?;
        renderer.draw_rotated_quad(
            Vec3::ZERO,
            Vec2::splat(1.0),
            t,
            Vec4::new(0.9, 0.4, 0.2, 1.0),
        )?;
        renderer.end_scene()?;
        renderer.reset_render_target()?;

        renderer.begin_scene(self.camera.view_projection())?;
        renderer.draw_textured_quad(
            Vec3::new(0.0, 0.0, -0.1),
            Vec2::splat(2.0 * ZOOM),
            &self.checker,
            4.0,
            Vec4::new(0.4, 0.4, 0.5, 1.0),
        )?;
        self.draw_grid(renderer, t)?;
        renderer.draw_rotated_textured_quad(
            Vec3::new(0.0, 0.0, 0.2),
            Vec2::splat(0.6),
            -t * 0.5,
            &self.target.texture,
            1.0,
            Vec4::ONE,
        )?;
        renderer.end_scene()?;

        renderer.end_frame()
    }

    fn draw_grid(&self, renderer: &mut dyn Renderer2D, t: f32) -> Result<()> {
        if self.quads == 0 {
            return Ok(());
        }
        let side = grid_side(self.quads);
        let step = 1.8 * ZOOM / side as f32;
        let size = Vec2::splat(step * 0.8);
        let origin = -0.9 * ZOOM + step * 0.5;
        for i in 0..self.quads {
            let (col, row) = (i % side, i / side);
            let pos = Vec3::new(origin + col as f32 * step, origin + row as f32 * step, 0.0);
            let hue = i as f32 / self.quads as f32;
            let color = Vec4::new(hue, 0.5 + 0.5 * (t + hue * 6.0).sin(), 1.0 - hue, 0.8);
            if i % 3 == 0 {
                renderer.draw_textured_quad(pos, size, &self.checker, 1.0, color)?;
            } else {
                renderer.draw_quad(pos, size, color)?;
            }
        }
        Ok(())
    }

    pub fn destroy(self, renderer: &mut dyn Renderer2D) -> Result<()> {
        renderer.destroy_render_target(self.target)?;
        renderer.destroy_texture(self.checker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadrant_render::{BatchRenderer, RenderError, RendererSettings};
    use quadrant_test_utils::{MockConfig, MockDevice};

    fn mock_renderer() -> (BatchRenderer<MockDevice>, quadrant_test_utils::MockLog) {
        let (device, log) = MockDevice::new(MockConfig::default());
        let renderer = BatchRenderer::new(device, &RendererSettings::default()).unwrap();
        (renderer, log)
    }

    #[test]
    fn frame_draws_target_then_screen() {
        let (mut r, log) = mock_renderer();
        let mut demo = Demo::new(&mut r, RenderSize::new(800, 600), 9).unwrap();
        assert!(demo.frame(&mut r, 0.5).unwrap());
        assert_eq!(log.draw_batches().len(), 2);
        assert_eq!(r.stats().quad_count, 1 + 1 + 9 + 1);
        demo.destroy(&mut r).unwrap();
        assert!(log.violations().is_empty(), "{:?}", log.violations());
    }

    #[test]
    fn failed_frame_stops_the_renderer() {
        let (mut r, log) = mock_renderer();
        let mut demo = Demo::new(&mut r, RenderSize::new(800, 600), 4).unwrap();
        log.fail_next_draw();
        assert!(matches!(demo.frame(&mut r, 0.0), Err(RenderError::Backend(_))));
        assert!(!r.is_frame_active());
        assert!(matches!(demo.frame(&mut r, 0.1), Err(RenderError::NotInitialized)));
        assert!(matches!(demo.destroy(&mut r), Err(RenderError::NotInitialized)));
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let a = [255, 0, 0, 255];
        let b = [0, 0, 255, 255];
        let px = checkerboard(4, 2, a, b);
        assert_eq!(px.len(), 4 * 4 * 4);
        let at = |x: usize, y: usize| &px[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(0, 0), a);
        assert_eq!(at(1, 1), a);
        assert_eq!(at(2, 0), b);
        assert_eq!(at(0, 2), b);
        assert_eq!(at(3, 3), a);
    }

    #[test]
    fn grid_fits_count() {
        assert_eq!(grid_side(0), 0);
        assert_eq!(grid_side(1), 1);
        assert_eq!(grid_side(4), 2);
        assert_eq!(grid_side(5), 3);
        assert_eq!(grid_side(10_000), 100);
    }

    #[test]
    fn zero_size_has_unit_aspect() {
        assert_eq!(aspect(RenderSize::new(0, 0)), 1.0);
        assert_eq!(aspect(RenderSize::new(200, 100)), 2.0);
    }
}
