// SPDX-License-Identifier: CEPL-1.0
use quadrant_render::{
    Acquire, BatchLimits, BatchRenderer, FrameIndex, ImageIndex, PassKind, PassTarget,
    PresentOutcome, RenderError, RenderSize, RenderTargetDesc, Renderer2D, RendererSettings,
    Vec2, Vec3, Vec4,
};
use quadrant_test_utils::{DeviceCall, MockConfig, MockDevice, MockLog};

fn renderer_with(config: MockConfig) -> (BatchRenderer<MockDevice>, MockLog) {
    let settings = RendererSettings {
        frames_in_flight: config.frames_in_flight,
        ..RendererSettings::default()
    };
    let (device, log) = MockDevice::new(config);
    let renderer = BatchRenderer::new(device, &settings).expect("mock renderer");
    (renderer, log)
}

fn renderer() -> (BatchRenderer<MockDevice>, MockLog) {
    renderer_with(MockConfig::default())
}

fn solid(r: &mut BatchRenderer<MockDevice>, n: u32) {
    for i in 0..n {
        r.draw_quad(Vec3::new(i as f32, 0.0, 0.0), Vec2::ONE, Vec4::ONE)
            .unwrap();
    }
}

fn checker(r: &mut BatchRenderer<MockDevice>) -> quadrant_render::TextureHandle {
    r.create_texture(2, 2, &[0xff; 16]).unwrap()
}

#[test]
fn overflowing_the_batch_flushes_once() {
    let (mut r, log) = renderer();
    assert!(r.begin_frame().unwrap());
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 10_001);
    r.end_scene().unwrap();
    assert!(r.end_frame().unwrap());

    let stats = r.stats();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.quad_count, 10_001);
    assert_eq!(stats.vertex_count(), 40_004);
    let batches: Vec<u32> = log.draw_batches().into_iter().map(|(q, _)| q).collect();
    assert_eq!(batches, vec![10_000, 1]);
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

#[test]
fn same_texture_reuses_its_slot() {
    let (mut r, log) = renderer();
    let tex = checker(&mut r);
    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    r.draw_textured_quad(Vec3::ZERO, Vec2::ONE, &tex, 1.0, Vec4::ONE)
        .unwrap();
    r.draw_textured_quad(Vec3::X, Vec2::ONE, &tex, 2.0, Vec4::ONE)
        .unwrap();
    assert_eq!(r.batch().texture_slot_index(), 2);
    let v = r.batch().vertices();
    assert_eq!(v[0].tex_index, 1.0);
    assert_eq!(v[4].tex_index, 1.0);
    r.end_scene().unwrap();
    r.end_frame().unwrap();

    let batches = log.draw_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1, vec![r.white_texture().id, tex.id]);
}

#[test]
fn solid_quads_leave_slot_table_alone() {
    let (mut r, _log) = renderer();
    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 3);
    assert_eq!(r.batch().texture_slot_index(), 1);
    assert!(r.batch().vertices().iter().all(|v| v.tex_index == 0.0));
    r.end_scene().unwrap();
    r.end_frame().unwrap();
}

#[test]
fn full_slot_table_forces_a_flush() {
    let config = MockConfig {
        limits: BatchLimits {
            max_quads: 100,
            max_texture_slots: 3,
        },
        ..MockConfig::default()
    };
    let (mut r, log) = renderer_with(config);
    let textures: Vec<_> = (0..3).map(|_| checker(&mut r)).collect();
    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    for t in &textures {
        r.draw_textured_quad(Vec3::ZERO, Vec2::ONE, t, 1.0, Vec4::ONE)
            .unwrap();
    }
    r.end_scene().unwrap();
    r.end_frame().unwrap();

    let batches = log.draw_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].0, 2);
    assert_eq!(batches[1].1, vec![r.white_texture().id, textures[2].id]);
    assert_eq!(r.stats().draw_calls, 2);
}

#[test]
fn in_flight_fences_never_exceed_ring_size() {
    let (mut r, log) = renderer();
    for _ in 0..10 {
        assert!(r.begin_frame().unwrap());
        r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
        solid(&mut r, 4);
        r.end_scene().unwrap();
        r.end_frame().unwrap();
        assert!(log.pending_fences() <= 2);
        assert!(r.ring().in_flight_count() <= 2);
    }
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

#[test]
fn fence_is_waited_before_reuse() {
    let (mut r, log) = renderer();
    for _ in 0..3 {
        r.begin_frame().unwrap();
        r.end_frame().unwrap();
    }
    let calls = log.calls();
    // third frame reuses ring slot 0
    let submits: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, DeviceCall::Submit { .. }))
        .map(|(i, _)| i)
        .collect();
    let wait = calls[submits[1]..]
        .iter()
        .position(|c| *c == DeviceCall::WaitForFrame(FrameIndex::new(0)));
    assert!(wait.is_some());
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

#[test]
fn render_target_round_trip_restores_viewport() {
    let (mut r, log) = renderer();
    let target = r
        .create_render_target(RenderTargetDesc {
            width: 256,
            height: 128,
            clear_color: Vec4::ZERO,
        })
        .unwrap();
    let before = r.router().viewport();

    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    r.set_render_target(&target).unwrap();
    assert_ne!(r.router().viewport(), before);
    r.reset_render_target().unwrap();
    assert_eq!(r.router().viewport(), before);
    assert_eq!(r.render_target(), None);
    solid(&mut r, 1);
    r.end_scene().unwrap();
    r.end_frame().unwrap();

    let last_draw_pass = log
        .passes()
        .into_iter()
        .filter(|p| p.kind != PassKind::Overlay)
        .last()
        .unwrap();
    assert!(matches!(last_draw_pass.target, PassTarget::Swapchain(_)));
    assert_eq!(last_draw_pass.viewport, before);
}

#[test]
fn stale_acquire_skips_frame_and_recovers() {
    let (mut r, log) = renderer();
    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 2);
    r.end_scene().unwrap();
    r.end_frame().unwrap();
    let stats = r.stats();

    log.fail_next_acquire();
    log.on_recreate(2, RenderSize::new(640, 480));
    assert!(!r.begin_frame().unwrap());
    assert_eq!(r.stats(), stats);
    assert!(log.calls().contains(&DeviceCall::RecreateSwapchain(RenderSize::new(800, 600))));
    assert_eq!(r.router().swapchain_extent(), RenderSize::new(640, 480));

    log.clear_calls();
    assert!(r.begin_frame().unwrap());
    assert_eq!(log.held_images().len(), 1);
    r.end_frame().unwrap();
    assert!(r.begin_frame().unwrap());
    r.end_frame().unwrap();

    let acquired: Vec<_> = log
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            DeviceCall::Acquire { image, .. } => image,
            _ => None,
        })
        .collect();
    assert_eq!(acquired.len(), 2);
    assert_ne!(acquired[0], acquired[1]);
    assert_eq!(r.stats(), stats);
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

#[test]
fn stale_present_rebuilds_after_presenting() {
    let (mut r, log) = renderer();
    log.script_present(PresentOutcome::Stale);
    r.begin_frame().unwrap();
    assert!(!r.end_frame().unwrap());
    let calls = log.calls();
    let present = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::Present { .. }))
        .unwrap();
    let rebuild = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::RecreateSwapchain(_)))
        .unwrap();
    assert!(present < rebuild);
    assert!(r.begin_frame().unwrap());
    r.end_frame().unwrap();
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

/// Index of the first call matching `pred`.
fn call_index(log: &MockLog, pred: impl Fn(&DeviceCall) -> bool) -> usize {
    log.calls()
        .iter()
        .position(pred)
        .expect("call was recorded")
}

#[test]
fn suboptimal_acquire_presents_then_rebuilds() {
    let (mut r, log) = renderer();
    log.script_acquire(Acquire::Image {
        index: ImageIndex::new(1),
        suboptimal: true,
    });
    assert!(r.begin_frame().unwrap());
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 1);
    r.end_scene().unwrap();
    assert!(r.end_frame().unwrap());

    let present = call_index(&log, |c| {
        matches!(c, DeviceCall::Present { image, .. } if *image == ImageIndex::new(1))
    });
    let rebuild = call_index(&log, |c| matches!(c, DeviceCall::RecreateSwapchain(_)));
    assert!(present < rebuild);
    assert_eq!(r.stats().draw_calls, 1);

    log.clear_calls();
    assert!(r.begin_frame().unwrap());
    assert!(r.end_frame().unwrap());
    assert!(!log
        .calls()
        .iter()
        .any(|c| matches!(c, DeviceCall::RecreateSwapchain(_))));
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

#[test]
fn suboptimal_present_still_counts_as_presented() {
    let (mut r, log) = renderer();
    log.script_present(PresentOutcome::Suboptimal);
    assert!(r.begin_frame().unwrap());
    assert!(r.end_frame().unwrap());

    let present = call_index(&log, |c| matches!(c, DeviceCall::Present { .. }));
    let rebuild = call_index(&log, |c| matches!(c, DeviceCall::RecreateSwapchain(_)));
    assert!(present < rebuild);
    assert!(r.begin_frame().unwrap());
    assert!(r.end_frame().unwrap());
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

#[test]
fn backend_failure_halts_the_renderer() {
    let (mut r, log) = renderer();
    log.fail_next_draw();
    assert!(r.begin_frame().unwrap());
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 3);
    assert!(matches!(r.end_scene(), Err(RenderError::Backend(_))));

    assert!(!r.is_frame_active());
    assert!(log.calls().contains(&DeviceCall::Shutdown));
    assert!(matches!(r.begin_frame(), Err(RenderError::NotInitialized)));
    assert!(matches!(
        r.draw_quad(Vec3::ZERO, Vec2::ONE, Vec4::ONE),
        Err(RenderError::NotInitialized)
    ));
    r.shutdown().unwrap();
    let shutdowns = log
        .calls()
        .iter()
        .filter(|c| **c == DeviceCall::Shutdown)
        .count();
    assert_eq!(shutdowns, 1);
}

#[test]
fn resize_flag_rebuilds_at_end_of_frame() {
    let (mut r, log) = renderer();
    r.on_window_resize(RenderSize::new(1024, 768));
    r.begin_frame().unwrap();
    assert!(r.end_frame().unwrap());
    assert!(log
        .calls()
        .contains(&DeviceCall::RecreateSwapchain(RenderSize::new(1024, 768))));
}

#[test]
fn switching_target_submits_queued_quads_to_previous_target() {
    let (mut r, log) = renderer();
    let target = r
        .create_render_target(RenderTargetDesc {
            width: 64,
            height: 64,
            clear_color: Vec4::ONE,
        })
        .unwrap();
    r.begin_frame().unwrap();
    log.clear_calls();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 5);
    r.set_render_target(&target).unwrap();
    solid(&mut r, 3);
    r.end_scene().unwrap();
    r.end_frame().unwrap();

    let calls = log.calls();
    let mut seen = Vec::new();
    let mut current = None;
    for call in calls {
        match call {
            DeviceCall::BeginPass { pass, .. } => current = Some(pass.target),
            DeviceCall::DrawBatch { quads, .. } => seen.push((current, quads)),
            _ => {}
        }
    }
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], (Some(PassTarget::Swapchain(_)), 5)));
    assert_eq!(seen[1], (Some(PassTarget::Offscreen(target.id)), 3));
    assert_eq!(r.stats().draw_calls, 2);
}

#[test]
fn empty_scene_still_submits() {
    let (mut r, log) = renderer();
    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    r.end_scene().unwrap();
    r.end_frame().unwrap();

    let calls = log.calls();
    assert!(log.draw_batches().is_empty());
    assert!(calls.iter().any(|c| matches!(c, DeviceCall::Submit { .. })));
    assert!(calls.iter().any(|c| matches!(c, DeviceCall::Present { .. })));
    assert_eq!(r.stats().draw_calls, 0);
}

#[test]
fn first_swapchain_pass_clears() {
    let (mut r, log) = renderer();
    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 1);
    r.end_scene().unwrap();
    r.end_frame().unwrap();

    let kinds: Vec<PassKind> = log.passes().into_iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![PassKind::Clear, PassKind::Overlay]);
}

#[test]
fn untouched_frame_gets_clear_and_overlay() {
    let (mut r, log) = renderer();
    r.begin_frame().unwrap();
    r.end_frame().unwrap();
    let kinds: Vec<PassKind> = log.passes().into_iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![PassKind::Clear, PassKind::Overlay]);
}

#[test]
fn clear_color_reaches_the_clear_pass() {
    let (mut r, log) = renderer();
    let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
    r.set_clear_color(red);
    r.begin_frame().unwrap();
    r.end_frame().unwrap();
    assert_eq!(log.passes()[0].clear_color, red);
}

#[test]
fn clear_inside_scene_keeps_drawing() {
    let (mut r, log) = renderer();
    r.begin_frame().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 2);
    r.clear().unwrap();
    solid(&mut r, 1);
    r.end_scene().unwrap();
    r.end_frame().unwrap();
    let batches: Vec<u32> = log.draw_batches().into_iter().map(|(q, _)| q).collect();
    assert_eq!(batches, vec![2, 1]);
    assert!(log.violations().is_empty(), "{:?}", log.violations());
}

#[test]
fn rendered_target_can_be_sampled() {
    let (mut r, log) = renderer();
    let target = r
        .create_render_target(RenderTargetDesc {
            width: 32,
            height: 32,
            clear_color: Vec4::ZERO,
        })
        .unwrap();
    r.begin_frame().unwrap();
    r.set_render_target(&target).unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    solid(&mut r, 1);
    r.end_scene().unwrap();
    r.reset_render_target().unwrap();
    r.begin_scene(quadrant_render::Mat4::IDENTITY).unwrap();
    r.draw_textured_quad(Vec3::ZERO, Vec2::ONE, &target.texture, 1.0, Vec4::ONE)
        .unwrap();
    r.end_scene().unwrap();
    r.end_frame().unwrap();
    let batches = log.draw_batches();
    assert_eq!(batches[1].1[1], target.texture.id);
}

#[test]
fn texture_lifecycle() {
    let (mut r, log) = renderer();
    let live = log.live_textures();
    let tex = checker(&mut r);
    assert_eq!(log.live_textures(), live + 1);
    r.destroy_texture(tex).unwrap();
    assert_eq!(log.live_textures(), live);
    assert!(r.create_texture(2, 2, &[0; 3]).is_err());
}

#[test]
fn calls_after_shutdown_fail() {
    let (mut r, log) = renderer();
    r.shutdown().unwrap();
    assert!(log.calls().contains(&DeviceCall::Shutdown));
    assert!(matches!(
        r.begin_frame(),
        Err(quadrant_render::RenderError::NotInitialized)
    ));
    r.shutdown().unwrap();
}
