//! Per-eye projection geometry.
//!
//! Pure functions from the optical model to field-of-view angles, pixel
//! viewports and projection matrices. Everything here is deterministic:
//! identical inputs produce bit-identical outputs, which is what lets the
//! scheduler treat the derived eye state as a cache keyed on the optical
//! configuration.

use glam::{Mat4, Vec4};

use crate::params::{Hmd, ScreenParams};

/// Which eye a set of render parameters belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeKind {
    Monocular,
    Left,
    Right,
}

/// Half-angles of a view frustum, in degrees, each measured outward from
/// the optical axis. All four are non-negative; left/right eyes are
/// horizontal mirrors of each other.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldOfView {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl FieldOfView {
    pub fn new(left: f32, right: f32, bottom: f32, top: f32) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }

    /// Off-axis perspective matrix for this field of view.
    ///
    /// Column-major, right-handed, depth mapped to [0, 1]. The near-plane
    /// extents are `z_near * tan(angle)` per side, so a symmetric FOV
    /// degenerates to an ordinary centered perspective.
    pub fn to_perspective(&self, z_near: f32, z_far: f32) -> Mat4 {
        assert!(
            z_near > 0.0 && z_far > z_near,
            "invalid z planes: near {z_near}, far {z_far}"
        );
        let left = -self.left.to_radians().tan() * z_near;
        let right = self.right.to_radians().tan() * z_near;
        let bottom = -self.bottom.to_radians().tan() * z_near;
        let top = self.top.to_radians().tan() * z_near;
        frustum(left, right, bottom, top, z_near, z_far)
    }
}

/// Asymmetric frustum with wgpu depth conventions (z in [0, 1]).
fn frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let x_scale = 2.0 * near / (right - left);
    let y_scale = 2.0 * near / (top - bottom);
    let x_offset = (right + left) / (right - left);
    let y_offset = (top + bottom) / (top - bottom);
    let z_scale = far / (near - far);
    let z_offset = near * far / (near - far);
    Mat4::from_cols(
        Vec4::new(x_scale, 0.0, 0.0, 0.0),
        Vec4::new(0.0, y_scale, 0.0, 0.0),
        Vec4::new(x_offset, y_offset, z_scale, -1.0),
        Vec4::new(0.0, 0.0, z_offset, 0.0),
    )
}

/// Integer pixel rectangle, origin at the bottom-left of the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// View and projection matrices for one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeTransform {
    pub eye_view: Mat4,
    pub perspective: Mat4,
}

impl Default for EyeTransform {
    fn default() -> Self {
        Self {
            eye_view: Mat4::IDENTITY,
            perspective: Mat4::IDENTITY,
        }
    }
}

/// Everything the scene renderer needs to draw one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeParams {
    pub kind: EyeKind,
    pub viewport: Viewport,
    pub fov: FieldOfView,
    pub transform: EyeTransform,
}

impl EyeParams {
    pub fn new(kind: EyeKind) -> Self {
        Self {
            kind,
            viewport: Viewport::default(),
            fov: FieldOfView::default(),
            transform: EyeTransform::default(),
        }
    }
}

/// One eye's rectangle inside the shared offscreen texture, in meters,
/// along with the optical-center position the distortion warp is relative to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Optical center, measured in texture space.
    pub eye_x: f32,
    pub eye_y: f32,
}

/// Derives both eyes' fields of view from the optical model.
///
/// For each of the four frustum edges the physical distance from the lens
/// axis to the visible screen edge is pushed through the lens distortion,
/// converted to an angle against the eye-to-screen distance, and clamped to
/// the widest angle the lens aperture itself admits. The right eye is the
/// horizontal mirror of the left.
pub fn compute_field_of_view(hmd: &Hmd) -> (FieldOfView, FieldOfView) {
    let viewer = &hmd.viewer;
    let screen = &hmd.screen;
    let distortion = &viewer.distortion;

    let ideal_fov_angle = (viewer.lens_diameter / 2.0)
        .atan2(viewer.eye_to_lens_distance)
        .to_degrees();
    let eye_to_screen = viewer.eye_to_screen_distance();

    let outer_dist = (screen.width_meters() - viewer.interpupillary_distance) / 2.0;
    let inner_dist = viewer.interpupillary_distance / 2.0;
    let bottom_dist = viewer.vertical_distance_to_lens_center - screen.border_size_meters;
    let top_dist =
        screen.height_meters() + screen.border_size_meters - viewer.vertical_distance_to_lens_center;

    let outer_angle = distortion.distort(outer_dist).atan2(eye_to_screen).to_degrees();
    let inner_angle = distortion.distort(inner_dist).atan2(eye_to_screen).to_degrees();
    let bottom_angle = distortion.distort(bottom_dist).atan2(eye_to_screen).to_degrees();
    let top_angle = distortion.distort(top_dist).atan2(eye_to_screen).to_degrees();

    let left_fov = FieldOfView::new(
        outer_angle.min(ideal_fov_angle),
        inner_angle.min(ideal_fov_angle),
        bottom_angle.min(ideal_fov_angle),
        top_angle.min(ideal_fov_angle),
    );
    let right_fov = FieldOfView::new(left_fov.right, left_fov.left, left_fov.bottom, left_fov.top);
    (left_fov, right_fov)
}

/// Converts a field of view into the eye's rectangle on the offscreen
/// texture: tangent extents at the eye-to-screen distance, stacked
/// horizontally at `x_offset_meters`.
pub fn texture_viewport_for_eye(
    fov: &FieldOfView,
    eye_to_screen_distance: f32,
    x_offset_meters: f32,
) -> TextureViewport {
    let left_m = fov.left.to_radians().tan() * eye_to_screen_distance;
    let right_m = fov.right.to_radians().tan() * eye_to_screen_distance;
    let bottom_m = fov.bottom.to_radians().tan() * eye_to_screen_distance;
    let top_m = fov.top.to_radians().tan() * eye_to_screen_distance;

    TextureViewport {
        x: x_offset_meters,
        y: 0.0,
        width: left_m + right_m,
        height: bottom_m + top_m,
        eye_x: left_m + x_offset_meters,
        eye_y: bottom_m,
    }
}

/// Rounds a texture-space rectangle to pixels through the screen's pixel
/// densities.
pub fn pixel_viewport(viewport: &TextureViewport, screen: &ScreenParams) -> Viewport {
    let x_px_per_m = screen.x_pixels_per_meter();
    let y_px_per_m = screen.y_pixels_per_meter();
    Viewport::new(
        (viewport.x * x_px_per_m).round() as i32,
        (viewport.y * y_px_per_m).round() as i32,
        (viewport.width * x_px_per_m).round() as i32,
        (viewport.height * y_px_per_m).round() as i32,
    )
}
