//! Render-thread scheduling.
//!
//! All GPU resources and all derived eye state have exactly one owner: the
//! render thread, i.e. whichever thread pumps [`RenderScheduler`]. Other
//! threads never touch that state directly; configuration changes go
//! through a [`SchedulerHandle`], which enqueues closures that the
//! scheduler drains ahead of each frame. Any number of queued changes
//! collapse into a single projection recomputation.
//!
//! Shutdown is the one blocking operation: the requester parks on a
//! one-shot channel that the scheduler releases after notifying the scene
//! renderer, which guarantees no GL/GPU resource is touched once the
//! requester proceeds with surface teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use glam::{Mat4, Vec3};
use log::{info, warn};

use crate::compositor::{CompositorError, DistortionCompositor, GpuContext, DEPTH_FORMAT};
use crate::geometry::{
    compute_field_of_view, pixel_viewport, texture_viewport_for_eye, EyeKind, EyeParams,
    FieldOfView, TextureViewport, Viewport,
};
use crate::head::HeadTransform;
use crate::params::{Hmd, ScreenParams, ViewerParams};
use crate::tracker::HeadTracker;

pub const DEFAULT_Z_NEAR: f32 = 0.1;
pub const DEFAULT_Z_FAR: f32 = 100.0;

/// Scene drawing callbacks implemented by the host application.
///
/// `on_draw_eye` is handed a render pass with the eye's viewport and
/// scissor already bound when the scheduler is driving a GPU; it receives
/// `None` in headless operation. Callbacks must not block significantly,
/// since they run inside the frame.
pub trait SceneRenderer: Send {
    fn on_surface_created(&mut self);
    fn on_surface_changed(&mut self, width: u32, height: u32);
    fn on_new_frame(&mut self, head: &HeadTransform);
    fn on_draw_eye(&mut self, eye: &EyeParams, pass: Option<&mut wgpu::RenderPass<'static>>);
    fn on_finish_frame(&mut self, viewport: &Viewport);
    fn on_renderer_shutdown(&mut self);
}

/// Scheduler lifecycle. `Shutdown` is terminal: frames and configuration
/// changes are silently dropped from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Rendering,
    ShuttingDown,
    Shutdown,
}

/// Configuration owned by the render thread, mutated only by drained tasks.
struct FrameConfig {
    hmd: Hmd,
    z_near: f32,
    z_far: f32,
    vr_mode: bool,
    distortion_enabled: bool,
    distortion_scale: f32,
    projection_changed: bool,
    scale_changed: bool,
    resurface: bool,
}

enum Task {
    Config(Box<dyn FnOnce(&mut FrameConfig) + Send>),
    Shutdown(Sender<()>),
}

struct SharedFlags {
    shutdown_requested: AtomicBool,
    shut_down: AtomicBool,
}

/// Clonable, thread-safe front end to the scheduler.
///
/// Setters are non-blocking: they enqueue and return. Screen and viewer
/// updates that compare equal to the last installed value are dropped
/// before they ever reach the queue, so redundant updates never mark the
/// projection dirty.
#[derive(Clone)]
pub struct SchedulerHandle {
    tasks: Sender<Task>,
    mirror: Arc<Mutex<Hmd>>,
    flags: Arc<SharedFlags>,
}

impl SchedulerHandle {
    fn enqueue(&self, apply: impl FnOnce(&mut FrameConfig) + Send + 'static) {
        if self.flags.shut_down.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tasks.send(Task::Config(Box::new(apply)));
    }

    /// Last screen/viewer configuration pushed through this handle.
    pub fn hmd(&self) -> Hmd {
        *self.mirror.lock().unwrap()
    }

    pub fn set_viewer_params(&self, viewer: ViewerParams) {
        {
            let mut mirror = self.mirror.lock().unwrap();
            if mirror.viewer == viewer {
                return;
            }
            mirror.viewer = viewer;
        }
        self.enqueue(move |config| {
            config.hmd.viewer = viewer;
            config.projection_changed = true;
        });
    }

    pub fn set_screen_params(&self, screen: ScreenParams) {
        {
            let mut mirror = self.mirror.lock().unwrap();
            if mirror.screen == screen {
                return;
            }
            mirror.screen = screen;
        }
        self.enqueue(move |config| {
            config.hmd.screen = screen;
            config.projection_changed = true;
        });
    }

    pub fn set_interpupillary_distance(&self, distance: f32) {
        self.mirror.lock().unwrap().viewer.interpupillary_distance = distance;
        self.enqueue(move |config| {
            config.hmd.viewer.interpupillary_distance = distance;
            config.projection_changed = true;
        });
    }

    pub fn set_fov_y(&self, fov_y: f32) {
        self.mirror.lock().unwrap().viewer.fov_y = fov_y;
        self.enqueue(move |config| {
            config.hmd.viewer.fov_y = fov_y;
            config.projection_changed = true;
        });
    }

    pub fn set_z_planes(&self, z_near: f32, z_far: f32) {
        self.enqueue(move |config| {
            config.z_near = z_near;
            config.z_far = z_far;
            config.projection_changed = true;
        });
    }

    pub fn set_distortion_enabled(&self, enabled: bool) {
        self.enqueue(move |config| {
            config.distortion_enabled = enabled;
            config.projection_changed = true;
        });
    }

    /// Only the sampling uniform changes; no mesh rebuild is forced.
    pub fn set_distortion_scale(&self, scale: f32) {
        self.enqueue(move |config| {
            config.distortion_scale = scale;
            config.scale_changed = true;
        });
    }

    pub fn set_vr_mode(&self, enabled: bool) {
        self.enqueue(move |config| {
            if config.vr_mode == enabled {
                return;
            }
            config.vr_mode = enabled;
            config.projection_changed = true;
            config.resurface = true;
        });
    }

    /// Requests an orderly shutdown and blocks until the render thread has
    /// notified the scene renderer and stopped producing frames. The
    /// render thread must keep pumping [`RenderScheduler::draw_frame`]
    /// until this returns. Calling again after completion returns
    /// immediately.
    pub fn shutdown(&self) {
        if self.flags.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.flags.shutdown_requested.store(true, Ordering::Release);
        let (done_tx, done_rx) = mpsc::channel();
        if self.tasks.send(Task::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.flags.shut_down.load(Ordering::Acquire)
    }
}

struct DirectDepth {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

/// The render-thread actor: owns the optical model, the derived per-eye
/// state, the head tracker handle and (when attached) the GPU compositor.
///
/// The host's render loop drives it: `on_surface_created`,
/// `on_surface_changed`, then `draw_frame` once per vsync.
pub struct RenderScheduler<R: SceneRenderer> {
    renderer: R,
    head_tracker: HeadTracker,
    config: FrameConfig,
    tasks: Receiver<Task>,
    flags: Arc<SharedFlags>,
    state: SchedulerState,
    gpu: Option<GpuContext>,
    compositor: Option<DistortionCompositor>,
    direct_depth: Option<DirectDepth>,
    monocular: EyeParams,
    left_eye: EyeParams,
    right_eye: EyeParams,
    texture_viewports: Option<(TextureViewport, TextureViewport)>,
    surface_size: Option<(u32, u32)>,
    invalid_surface_size: bool,
    projection_generation: u64,
}

impl<R: SceneRenderer> RenderScheduler<R> {
    pub fn new(renderer: R, head_tracker: HeadTracker, hmd: Hmd) -> (Self, SchedulerHandle) {
        let (task_tx, task_rx) = mpsc::channel();
        let flags = Arc::new(SharedFlags {
            shutdown_requested: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        });
        let handle = SchedulerHandle {
            tasks: task_tx,
            mirror: Arc::new(Mutex::new(hmd)),
            flags: Arc::clone(&flags),
        };
        let scheduler = Self {
            renderer,
            head_tracker,
            config: FrameConfig {
                hmd,
                z_near: DEFAULT_Z_NEAR,
                z_far: DEFAULT_Z_FAR,
                vr_mode: true,
                distortion_enabled: true,
                distortion_scale: 1.0,
                projection_changed: true,
                scale_changed: false,
                resurface: false,
            },
            tasks: task_rx,
            flags,
            state: SchedulerState::Idle,
            gpu: None,
            compositor: None,
            direct_depth: None,
            monocular: EyeParams::new(EyeKind::Monocular),
            left_eye: EyeParams::new(EyeKind::Left),
            right_eye: EyeParams::new(EyeKind::Right),
            texture_viewports: None,
            surface_size: None,
            invalid_surface_size: false,
            projection_generation: 0,
        };
        (scheduler, handle)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Incremented once per projection recomputation; any number of queued
    /// configuration changes before a frame bump this exactly once.
    pub fn projection_generation(&self) -> u64 {
        self.projection_generation
    }

    pub fn monocular_eye(&self) -> &EyeParams {
        &self.monocular
    }

    pub fn left_eye(&self) -> &EyeParams {
        &self.left_eye
    }

    pub fn right_eye(&self) -> &EyeParams {
        &self.right_eye
    }

    /// The eyes' rectangles inside the shared stereo texture, in meters.
    /// `None` outside the distortion-corrected path.
    pub fn texture_viewports(&self) -> Option<&(TextureViewport, TextureViewport)> {
        self.texture_viewports.as_ref()
    }

    /// Attaches the GPU (compiling the warp pipeline) and notifies the
    /// scene renderer. With `None` the scheduler runs headless: all
    /// geometry and callbacks, no GPU work.
    pub fn on_surface_created(&mut self, gpu: Option<GpuContext>) -> Result<(), CompositorError> {
        if self.state == SchedulerState::Shutdown {
            return Ok(());
        }
        if let Some(gpu) = gpu {
            self.compositor = Some(DistortionCompositor::new(gpu.clone())?);
            self.gpu = Some(gpu);
        }
        self.state = SchedulerState::Rendering;
        self.renderer.on_surface_created();
        Ok(())
    }

    /// Reports the real surface size. A mismatch against the configured
    /// screen parameters disables rendering (one-time diagnostic) until the
    /// sizes agree again.
    pub fn on_surface_changed(&mut self, width: u32, height: u32) {
        if self.state == SchedulerState::Shutdown {
            return;
        }
        let screen = self.config.hmd.screen;
        if (width, height) != (screen.width, screen.height) {
            if !self.invalid_surface_size {
                warn!(
                    "surface size {width}x{height} does not match the expected screen size {}x{}; rendering is disabled",
                    screen.width, screen.height
                );
            }
            self.invalid_surface_size = true;
        } else {
            self.invalid_surface_size = false;
        }
        self.surface_size = Some((width, height));
        self.notify_surface_changed(width, height);
    }

    fn notify_surface_changed(&mut self, width: u32, height: u32) {
        // A stereo renderer sees one eye's worth of width.
        if self.config.vr_mode {
            self.renderer.on_surface_changed(width / 2, height);
        } else {
            self.renderer.on_surface_changed(width, height);
        }
    }

    /// Runs one frame: drain queued changes, recompute projection state if
    /// dirty, fetch the predicted head pose, invoke the scene renderer per
    /// eye and composite.
    ///
    /// `output` is the frame's surface view; pass `None` to run headless.
    /// GPU errors during a projection rebuild stop the pipeline.
    pub fn draw_frame(&mut self, output: Option<&wgpu::TextureView>) -> Result<(), CompositorError> {
        self.drain_tasks();
        if !matches!(
            self.state,
            SchedulerState::Rendering | SchedulerState::ShuttingDown
        ) {
            return Ok(());
        }
        if self.invalid_surface_size {
            self.clear_output(output);
            return Ok(());
        }

        if self.config.scale_changed {
            self.config.scale_changed = false;
            if let Some(compositor) = self.compositor.as_mut() {
                compositor.set_resolution_scale(self.config.distortion_scale);
            }
        }
        if self.config.resurface {
            self.config.resurface = false;
            if let Some((width, height)) = self.surface_size {
                self.notify_surface_changed(width, height);
            }
        }

        // Predicted head pose, then per-eye views: each eye is the head
        // view translated along the interpupillary axis by half the IPD.
        let head_view = self.head_tracker.last_head_view();
        let head = HeadTransform::new(head_view);
        let half_ipd = self.config.hmd.viewer.interpupillary_distance * 0.5;
        if self.config.vr_mode {
            self.left_eye.transform.eye_view =
                Mat4::from_translation(Vec3::new(half_ipd, 0.0, 0.0)) * head_view;
            self.right_eye.transform.eye_view =
                Mat4::from_translation(Vec3::new(-half_ipd, 0.0, 0.0)) * head_view;
        } else {
            self.monocular.transform.eye_view = head_view;
        }

        if self.config.projection_changed {
            self.recompute_projection()?;
        }

        self.renderer.on_new_frame(&head);

        if self.config.vr_mode {
            self.draw_stereo(output)?;
        } else {
            self.draw_monocular(output);
        }

        self.renderer.on_finish_frame(&self.monocular.viewport);
        Ok(())
    }

    fn draw_stereo(&mut self, output: Option<&wgpu::TextureView>) -> Result<(), CompositorError> {
        let distortion_on = self.config.distortion_enabled;
        let scale = self.config.distortion_scale;

        let mut left = self.left_eye;
        let mut right = self.right_eye;
        if distortion_on && scale != 1.0 {
            // Shrink scene rendering around the viewport origin; the warp
            // pass compensates through its sampling uniform.
            left.viewport = scale_viewport(&left.viewport, scale);
            right.viewport = scale_viewport(&right.viewport, scale);
        }

        let mut drew = false;
        if let (Some(gpu), Some(output_view)) = (self.gpu.clone(), output) {
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                });
            if distortion_on {
                if let Some(compositor) = self.compositor.as_ref() {
                    if let (Some((color, depth)), Some((_, target_height))) =
                        (compositor.scene_target(), compositor.offscreen_size())
                    {
                        clear_target(&mut encoder, color, Some(depth));
                        for eye in [&left, &right] {
                            let mut pass =
                                eye_pass(&mut encoder, color, Some(depth), target_height, &eye.viewport);
                            self.renderer.on_draw_eye(eye, Some(&mut pass));
                        }
                        let screen = self.config.hmd.screen;
                        compositor.after_draw_frame(
                            &mut encoder,
                            output_view,
                            screen.width,
                            screen.height,
                        );
                        drew = true;
                    }
                }
            } else {
                let (_, target_height) = self.surface_target_size();
                self.ensure_direct_depth(&gpu);
                let depth = self.direct_depth.as_ref().map(|d| &d.view);
                clear_target(&mut encoder, output_view, depth);
                for eye in [&left, &right] {
                    let mut pass =
                        eye_pass(&mut encoder, output_view, depth, target_height, &eye.viewport);
                    self.renderer.on_draw_eye(eye, Some(&mut pass));
                }
                drew = true;
            }
            gpu.queue.submit(std::iter::once(encoder.finish()));
        }
        if !drew {
            self.renderer.on_draw_eye(&left, None);
            self.renderer.on_draw_eye(&right, None);
        }
        Ok(())
    }

    fn draw_monocular(&mut self, output: Option<&wgpu::TextureView>) {
        let eye = self.monocular;
        let mut drew = false;
        if let (Some(gpu), Some(output_view)) = (self.gpu.clone(), output) {
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                });
            let (_, target_height) = self.surface_target_size();
            self.ensure_direct_depth(&gpu);
            let depth = self.direct_depth.as_ref().map(|d| &d.view);
            clear_target(&mut encoder, output_view, depth);
            {
                let mut pass = eye_pass(&mut encoder, output_view, depth, target_height, &eye.viewport);
                self.renderer.on_draw_eye(&eye, Some(&mut pass));
            }
            gpu.queue.submit(std::iter::once(encoder.finish()));
            drew = true;
        }
        if !drew {
            self.renderer.on_draw_eye(&eye, None);
        }
    }

    /// Recomputes everything derived from the optical configuration. Runs
    /// at most once per frame no matter how many changes were queued.
    fn recompute_projection(&mut self) -> Result<(), CompositorError> {
        let hmd = self.config.hmd;
        let screen = hmd.screen;
        let viewer = hmd.viewer;
        let (z_near, z_far) = (self.config.z_near, self.config.z_far);

        self.monocular.viewport = Viewport::new(0, 0, screen.width as i32, screen.height as i32);

        if !self.config.vr_mode {
            let aspect = screen.width as f32 / screen.height as f32;
            let half_v = viewer.fov_y / 2.0;
            let half_h = ((half_v.to_radians().tan() * aspect).atan()).to_degrees();
            self.monocular.fov = FieldOfView::new(half_h, half_h, half_v, half_v);
            self.monocular.transform.perspective =
                Mat4::perspective_rh(viewer.fov_y.to_radians(), aspect, z_near, z_far);
        } else if self.config.distortion_enabled {
            let (left_fov, right_fov) = compute_field_of_view(&hmd);
            self.left_eye.fov = left_fov;
            self.right_eye.fov = right_fov;

            let eye_to_screen = viewer.eye_to_screen_distance();
            let left_viewport = texture_viewport_for_eye(&left_fov, eye_to_screen, 0.0);
            let right_viewport =
                texture_viewport_for_eye(&right_fov, eye_to_screen, left_viewport.width);
            self.left_eye.viewport = pixel_viewport(&left_viewport, &screen);
            self.right_eye.viewport = pixel_viewport(&right_viewport, &screen);
            self.left_eye.transform.perspective = left_fov.to_perspective(z_near, z_far);
            self.right_eye.transform.perspective = right_fov.to_perspective(z_near, z_far);
            self.texture_viewports = Some((left_viewport, right_viewport));

            if let Some(compositor) = self.compositor.as_mut() {
                compositor.on_projection_changed(&hmd, &left_viewport, &right_viewport)?;
            }
        } else {
            // Flat-screen stereo: no lens correction, eyes get the literal
            // screen halves and the FOV comes from the visible viewport.
            let half_ipd = viewer.interpupillary_distance / 2.0;
            let eye_to_screen =
                viewer.visible_viewport_size / 2.0 / (viewer.fov_y.to_radians() / 2.0).tan();

            let left_dist = screen.width_meters() / 2.0 - half_ipd;
            let right_dist = half_ipd;
            let bottom_dist = viewer.vertical_distance_to_lens_center - screen.border_size_meters;
            let top_dist = screen.border_size_meters + screen.height_meters()
                - viewer.vertical_distance_to_lens_center;

            let left_fov = FieldOfView::new(
                left_dist.atan2(eye_to_screen).to_degrees(),
                right_dist.atan2(eye_to_screen).to_degrees(),
                bottom_dist.atan2(eye_to_screen).to_degrees(),
                top_dist.atan2(eye_to_screen).to_degrees(),
            );
            let right_fov =
                FieldOfView::new(left_fov.right, left_fov.left, left_fov.bottom, left_fov.top);
            self.left_eye.fov = left_fov;
            self.right_eye.fov = right_fov;
            self.left_eye.transform.perspective = left_fov.to_perspective(z_near, z_far);
            self.right_eye.transform.perspective = right_fov.to_perspective(z_near, z_far);

            let half_width = screen.width as i32 / 2;
            let height = screen.height as i32;
            self.left_eye.viewport = Viewport::new(0, 0, half_width, height);
            self.right_eye.viewport = Viewport::new(half_width, 0, half_width, height);
            self.texture_viewports = None;
        }

        self.projection_generation += 1;
        self.config.projection_changed = false;
        Ok(())
    }

    fn drain_tasks(&mut self) {
        if self.flags.shutdown_requested.load(Ordering::Acquire)
            && self.state == SchedulerState::Rendering
        {
            self.state = SchedulerState::ShuttingDown;
        }
        while let Ok(task) = self.tasks.try_recv() {
            match task {
                Task::Config(apply) => {
                    if self.state != SchedulerState::Shutdown {
                        apply(&mut self.config);
                    }
                }
                Task::Shutdown(done) => {
                    if self.state != SchedulerState::Shutdown {
                        self.state = SchedulerState::ShuttingDown;
                        self.renderer.on_renderer_shutdown();
                        self.state = SchedulerState::Shutdown;
                        self.flags.shut_down.store(true, Ordering::Release);
                        info!("render scheduler shut down");
                    }
                    let _ = done.send(());
                }
            }
        }
    }

    fn surface_target_size(&self) -> (u32, u32) {
        self.surface_size.unwrap_or((
            self.config.hmd.screen.width,
            self.config.hmd.screen.height,
        ))
    }

    fn ensure_direct_depth(&mut self, gpu: &GpuContext) {
        let size = self.surface_target_size();
        if self.direct_depth.as_ref().map(|d| d.size) == Some(size) {
            return;
        }
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Direct Depth Texture"),
            size: wgpu::Extent3d {
                width: size.0.max(1),
                height: size.1.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.direct_depth = Some(DirectDepth {
            _texture: texture,
            view,
            size,
        });
    }

    fn clear_output(&mut self, output: Option<&wgpu::TextureView>) {
        if let (Some(gpu), Some(output_view)) = (self.gpu.as_ref(), output) {
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Clear Encoder"),
                });
            clear_target(&mut encoder, output_view, None);
            gpu.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

/// Truncating viewport scale, anchored at the viewport origin.
fn scale_viewport(viewport: &Viewport, scale: f32) -> Viewport {
    Viewport::new(
        (viewport.x as f32 * scale) as i32,
        (viewport.y as f32 * scale) as i32,
        (viewport.width as f32 * scale) as i32,
        (viewport.height as f32 * scale) as i32,
    )
}

fn clear_target(
    encoder: &mut wgpu::CommandEncoder,
    color: &wgpu::TextureView,
    depth: Option<&wgpu::TextureView>,
) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Clear Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: color,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(0),
                store: wgpu::StoreOp::Store,
            }),
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

/// Begins a scene pass for one eye with its viewport and scissor bound.
/// Viewports use a bottom-left origin throughout the crate; the flip into
/// wgpu's top-left convention happens here.
fn eye_pass(
    encoder: &mut wgpu::CommandEncoder,
    color: &wgpu::TextureView,
    depth: Option<&wgpu::TextureView>,
    target_height: u32,
    viewport: &Viewport,
) -> wgpu::RenderPass<'static> {
    let mut pass = encoder
        .begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Eye Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth.map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        })
        .forget_lifetime();

    let y_top = target_height as i32 - viewport.y - viewport.height;
    pass.set_viewport(
        viewport.x as f32,
        y_top as f32,
        viewport.width as f32,
        viewport.height as f32,
        0.0,
        1.0,
    );
    pass.set_scissor_rect(
        viewport.x.max(0) as u32,
        y_top.max(0) as u32,
        viewport.width.max(0) as u32,
        viewport.height.max(0) as u32,
    );
    pass
}
