//! Stereo rendering core for lens-based head-mounted viewers.
//!
//! Renders a host application's scene once per eye and warps the result
//! through a precomputed distortion mesh so it appears undistorted through
//! the viewer's lenses. The crate derives each eye's field of view and
//! viewport from physical screen and viewer measurements, predicts the
//! head orientation slightly into the future to hide pipeline latency, and
//! serializes all configuration changes onto the render thread.
//!
//! The host supplies three things: a [`SceneRenderer`] that draws the
//! actual content, an [`OrientationFilter`] fed by a [`SensorSource`], and
//! (for real rendering) a [`GpuContext`]. Everything else lives here:
//! optics, geometry, warp meshes, GPU compositing and scheduling.

mod compositor;
mod distortion;
mod geometry;
mod head;
mod mesh;
mod params;
mod scheduler;
mod tracker;

pub use compositor::{CompositorError, DistortionCompositor, GpuContext, DEPTH_FORMAT};
pub use distortion::RadialDistortion;
pub use geometry::{
    compute_field_of_view, pixel_viewport, texture_viewport_for_eye, EyeKind, EyeParams,
    EyeTransform, FieldOfView, TextureViewport, Viewport,
};
pub use head::HeadTransform;
pub use mesh::{
    DistortionMesh, MeshVertex, MESH_COLS, MESH_INDEX_COUNT, MESH_ROWS, MESH_VERTEX_COUNT,
};
pub use params::{Hmd, ScreenParams, ViewerParams, METERS_PER_INCH};
pub use scheduler::{
    RenderScheduler, SceneRenderer, SchedulerHandle, SchedulerState, DEFAULT_Z_FAR, DEFAULT_Z_NEAR,
};
pub use tracker::{HeadTracker, OrientationFilter, SensorSample, SensorSource};
