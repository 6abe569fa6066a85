//! Frame-loop scenarios driven through a recording scene renderer, with no
//! GPU attached: the scheduler runs the full drain/geometry/callback path
//! headlessly.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use glam::Mat4;
use stereoview::{
    EyeKind, EyeParams, HeadTracker, HeadTransform, Hmd, OrientationFilter, RenderScheduler,
    SceneRenderer, SchedulerHandle, SchedulerState, ScreenParams, ViewerParams, Viewport,
};

#[derive(Default)]
struct Record {
    new_frames: u32,
    eyes: Vec<EyeParams>,
    finish_viewports: Vec<Viewport>,
    surface_changes: Vec<(u32, u32)>,
    shutdowns: u32,
}

#[derive(Clone, Default)]
struct RecordingRenderer(Arc<Mutex<Record>>);

impl SceneRenderer for RecordingRenderer {
    fn on_surface_created(&mut self) {}
    fn on_surface_changed(&mut self, width: u32, height: u32) {
        self.0.lock().unwrap().surface_changes.push((width, height));
    }
    fn on_new_frame(&mut self, _head: &HeadTransform) {
        self.0.lock().unwrap().new_frames += 1;
    }
    fn on_draw_eye(&mut self, eye: &EyeParams, _pass: Option<&mut wgpu::RenderPass<'static>>) {
        self.0.lock().unwrap().eyes.push(*eye);
    }
    fn on_finish_frame(&mut self, viewport: &Viewport) {
        self.0.lock().unwrap().finish_viewports.push(*viewport);
    }
    fn on_renderer_shutdown(&mut self) {
        self.0.lock().unwrap().shutdowns += 1;
    }
}

/// A filter that never moves: prediction is always the identity.
struct StillFilter;

impl OrientationFilter for StillFilter {
    fn reset(&mut self) {}
    fn process_accelerometer(&mut self, _v: glam::Vec3, _timestamp_ns: i64) {}
    fn process_gyroscope(&mut self, _v: glam::Vec3, _timestamp_ns: i64) {}
    fn process_magnetometer(&mut self, _v: glam::Vec3, _timestamp_ns: i64) {}
    fn predict(&self, _look_ahead_seconds: f64) -> Mat4 {
        Mat4::IDENTITY
    }
}

fn test_hmd() -> Hmd {
    Hmd::new(
        ScreenParams::new(1920, 1080, 0.00025, 0.00025),
        ViewerParams::default(),
    )
}

fn new_scheduler() -> (
    RenderScheduler<RecordingRenderer>,
    SchedulerHandle,
    Arc<Mutex<Record>>,
) {
    let record = Arc::new(Mutex::new(Record::default()));
    let renderer = RecordingRenderer(Arc::clone(&record));
    let tracker = HeadTracker::new(Box::new(StillFilter));
    let (mut scheduler, handle) = RenderScheduler::new(renderer, tracker, test_hmd());
    scheduler
        .on_surface_created(None)
        .expect("headless surface creation cannot fail");
    scheduler.on_surface_changed(1920, 1080);
    (scheduler, handle, record)
}

#[test]
fn stereo_frame_draws_left_then_right_at_half_texture_width() {
    let (mut scheduler, _handle, record) = new_scheduler();
    scheduler.draw_frame(None).unwrap();

    let record = record.lock().unwrap();
    assert_eq!(record.new_frames, 1);
    assert_eq!(record.eyes.len(), 2);
    assert_eq!(record.eyes[0].kind, EyeKind::Left);
    assert_eq!(record.eyes[1].kind, EyeKind::Right);

    // Each eye occupies exactly half of the shared stereo texture.
    let left = record.eyes[0].viewport;
    let right = record.eyes[1].viewport;
    assert_eq!(left.x, 0);
    assert_eq!(left.y, 0);
    assert_eq!(right.x, left.width);
    assert_eq!(left.width, right.width);
    assert_eq!(left.height, right.height);
    assert!(left.width > 0 && left.height > 0);

    let (left_m, right_m) = *scheduler.texture_viewports().unwrap();
    assert!((right_m.x - left_m.width).abs() < 1e-6);
    assert!((left_m.width - right_m.width).abs() < 1e-6);

    assert_eq!(record.finish_viewports, vec![Viewport::new(0, 0, 1920, 1080)]);
    // The stereo renderer was told about half the surface.
    assert_eq!(record.surface_changes, vec![(960, 1080)]);
}

#[test]
fn eye_views_are_translated_by_half_the_ipd() {
    let (mut scheduler, handle, record) = new_scheduler();
    handle.set_interpupillary_distance(0.07);
    scheduler.draw_frame(None).unwrap();

    let record = record.lock().unwrap();
    let left = record.eyes[0].transform.eye_view;
    let right = record.eyes[1].transform.eye_view;
    assert!((left.w_axis.x - 0.035).abs() < 1e-7);
    assert!((right.w_axis.x + 0.035).abs() < 1e-7);
    assert_eq!(left.w_axis.y, 0.0);
    assert_eq!(left.w_axis.z, 0.0);
}

#[test]
fn monocular_mode_draws_once_with_a_symmetric_projection() {
    let (mut scheduler, handle, record) = new_scheduler();
    handle.set_vr_mode(false);
    scheduler.draw_frame(None).unwrap();

    let record = record.lock().unwrap();
    assert_eq!(record.eyes.len(), 1);
    let eye = &record.eyes[0];
    assert_eq!(eye.kind, EyeKind::Monocular);
    assert_eq!(eye.viewport, Viewport::new(0, 0, 1920, 1080));
    // Symmetric projection: no off-axis terms.
    assert_eq!(eye.transform.perspective.z_axis.x, 0.0);
    assert_eq!(eye.transform.perspective.z_axis.y, 0.0);
    // The head view is copied with no interpupillary translation.
    assert_eq!(eye.transform.eye_view.w_axis.x, 0.0);
    // Leaving VR mode re-reports the full surface to the renderer.
    assert_eq!(record.surface_changes, vec![(960, 1080), (1920, 1080)]);
}

#[test]
fn queued_changes_collapse_into_one_projection_rebuild() {
    let (mut scheduler, handle, record) = new_scheduler();
    scheduler.draw_frame(None).unwrap();
    let generation = scheduler.projection_generation();
    let perspective_before = record.lock().unwrap().eyes[0].transform.perspective;

    handle.set_fov_y(70.0);
    handle.set_z_planes(0.2, 50.0);
    scheduler.draw_frame(None).unwrap();

    assert_eq!(scheduler.projection_generation(), generation + 1);
    let record = record.lock().unwrap();
    let perspective_after = record.eyes[2].transform.perspective;
    // The z-plane change reached the projection.
    assert_ne!(perspective_before, perspective_after);
}

#[test]
fn redundant_viewer_update_never_marks_dirty() {
    let (mut scheduler, handle, _record) = new_scheduler();
    scheduler.draw_frame(None).unwrap();
    let generation = scheduler.projection_generation();

    handle.set_viewer_params(ViewerParams::default());
    scheduler.draw_frame(None).unwrap();
    assert_eq!(scheduler.projection_generation(), generation);

    let mut changed = ViewerParams::default();
    changed.interpupillary_distance = 0.064;
    handle.set_viewer_params(changed);
    scheduler.draw_frame(None).unwrap();
    assert_eq!(scheduler.projection_generation(), generation + 1);
}

#[test]
fn distortion_scale_skips_the_rebuild_and_shrinks_scene_viewports() {
    let (mut scheduler, handle, record) = new_scheduler();
    scheduler.draw_frame(None).unwrap();
    let generation = scheduler.projection_generation();
    let full = record.lock().unwrap().eyes[0].viewport;

    handle.set_distortion_scale(0.5);
    scheduler.draw_frame(None).unwrap();

    assert_eq!(scheduler.projection_generation(), generation);
    let record = record.lock().unwrap();
    let scaled = record.eyes[2].viewport;
    assert_eq!(scaled.width, (full.width as f32 * 0.5) as i32);
    assert_eq!(scaled.height, (full.height as f32 * 0.5) as i32);
    // The cached projection state keeps the unscaled viewport.
    assert_eq!(scheduler.left_eye().viewport, full);
}

#[test]
fn undistorted_vr_mode_uses_literal_screen_halves() {
    let (mut scheduler, handle, record) = new_scheduler();
    handle.set_distortion_enabled(false);
    scheduler.draw_frame(None).unwrap();

    let record = record.lock().unwrap();
    assert_eq!(record.eyes.len(), 2);
    assert_eq!(record.eyes[0].viewport, Viewport::new(0, 0, 960, 1080));
    assert_eq!(record.eyes[1].viewport, Viewport::new(960, 0, 960, 1080));
    // Mirrored horizontal angles.
    let left = record.eyes[0].fov;
    let right = record.eyes[1].fov;
    assert_eq!(left.left.to_bits(), right.right.to_bits());
    assert_eq!(left.right.to_bits(), right.left.to_bits());
}

#[test]
fn surface_size_mismatch_disables_frames_until_sizes_agree() {
    let (mut scheduler, _handle, record) = new_scheduler();
    scheduler.draw_frame(None).unwrap();
    assert_eq!(record.lock().unwrap().new_frames, 1);

    scheduler.on_surface_changed(800, 600);
    scheduler.draw_frame(None).unwrap();
    scheduler.draw_frame(None).unwrap();
    {
        let record = record.lock().unwrap();
        assert_eq!(record.new_frames, 1, "frames ran against a mismatched surface");
        // The renderer still hears about the size change, at eye width.
        assert_eq!(record.surface_changes.last(), Some(&(400, 600)));
    }

    scheduler.on_surface_changed(1920, 1080);
    scheduler.draw_frame(None).unwrap();
    assert_eq!(record.lock().unwrap().new_frames, 2);
}

#[test]
fn shutdown_blocks_until_renderer_notified_and_stops_frames() {
    let (mut scheduler, handle, record) = new_scheduler();

    let pump = thread::spawn(move || {
        while scheduler.state() != SchedulerState::Shutdown {
            scheduler.draw_frame(None).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        scheduler
    });

    // Let a few frames through before asking for shutdown.
    thread::sleep(Duration::from_millis(20));
    handle.shutdown();
    assert!(handle.is_shut_down());

    // The handshake completes only after the renderer heard about it, and
    // no frame can start afterwards.
    let frames_at_shutdown = {
        let record = record.lock().unwrap();
        assert_eq!(record.shutdowns, 1);
        record.new_frames
    };
    assert!(frames_at_shutdown > 0);

    let mut scheduler = pump.join().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Shutdown);

    // Frames and configuration changes are silently dropped from here on.
    let generation = scheduler.projection_generation();
    handle.set_fov_y(80.0);
    scheduler.draw_frame(None).unwrap();
    assert_eq!(record.lock().unwrap().new_frames, frames_at_shutdown);
    assert_eq!(scheduler.projection_generation(), generation);
    assert_eq!(record.lock().unwrap().shutdowns, 1);

    // A second shutdown returns immediately.
    handle.shutdown();
}
