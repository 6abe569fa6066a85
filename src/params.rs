//! Physical display and viewer parameters.
//!
//! Everything downstream of this module (field-of-view derivation, the
//! distortion mesh, the compositor's offscreen sizing) works in meters on a
//! landscape-oriented screen, so `ScreenParams` normalizes orientation at
//! construction time.

use crate::distortion::RadialDistortion;

/// Meters per inch, for converting display DPI into physical pixel pitch.
pub const METERS_PER_INCH: f32 = 0.0254;

const DEFAULT_BORDER_SIZE_METERS: f32 = 0.003;

/// Physical parameters of the display panel behind the lenses.
///
/// Width and height are stored landscape-normalized: `width >= height`
/// always holds, with the per-axis pixel pitches swapped alongside the
/// dimensions when a portrait display is reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenParams {
    pub width: u32,
    pub height: u32,
    pub x_meters_per_pixel: f32,
    pub y_meters_per_pixel: f32,
    pub border_size_meters: f32,
}

impl ScreenParams {
    pub fn new(width: u32, height: u32, x_meters_per_pixel: f32, y_meters_per_pixel: f32) -> Self {
        let mut params = Self {
            width,
            height,
            x_meters_per_pixel,
            y_meters_per_pixel,
            border_size_meters: DEFAULT_BORDER_SIZE_METERS,
        };
        if params.height > params.width {
            std::mem::swap(&mut params.width, &mut params.height);
            std::mem::swap(&mut params.x_meters_per_pixel, &mut params.y_meters_per_pixel);
        }
        params
    }

    /// Builds screen parameters from a raw display query reporting pixel
    /// dimensions and DPI per axis, as window systems expose them.
    pub fn from_display_metrics(width: u32, height: u32, x_dpi: f32, y_dpi: f32) -> Self {
        Self::new(width, height, METERS_PER_INCH / x_dpi, METERS_PER_INCH / y_dpi)
    }

    pub fn with_border_size(mut self, border_size_meters: f32) -> Self {
        self.border_size_meters = border_size_meters;
        self
    }

    pub fn width_meters(&self) -> f32 {
        self.width as f32 * self.x_meters_per_pixel
    }

    pub fn height_meters(&self) -> f32 {
        self.height as f32 * self.y_meters_per_pixel
    }

    /// Pixels per meter along the horizontal axis.
    pub fn x_pixels_per_meter(&self) -> f32 {
        1.0 / self.x_meters_per_pixel
    }

    /// Pixels per meter along the vertical axis.
    pub fn y_pixels_per_meter(&self) -> f32 {
        1.0 / self.y_meters_per_pixel
    }
}

/// Lens and enclosure geometry of the stereoscopic viewer.
///
/// All distances are meters; `fov_y` is degrees. Equality is exact on every
/// field, which is what the configuration update path relies on to drop
/// redundant updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerParams {
    /// Distance between the two lens centers.
    pub interpupillary_distance: f32,
    /// Distance from the bottom screen edge up to the lens centers.
    pub vertical_distance_to_lens_center: f32,
    pub lens_diameter: f32,
    pub screen_to_lens_distance: f32,
    pub eye_to_lens_distance: f32,
    /// Largest screen extent visible through one lens.
    pub visible_viewport_size: f32,
    /// Vertical field of view in degrees, used for the monocular and
    /// undistorted projection paths.
    pub fov_y: f32,
    pub distortion: RadialDistortion,
}

impl Default for ViewerParams {
    fn default() -> Self {
        Self {
            interpupillary_distance: 0.06,
            vertical_distance_to_lens_center: 0.035,
            lens_diameter: 0.025,
            screen_to_lens_distance: 0.037,
            eye_to_lens_distance: 0.011,
            visible_viewport_size: 0.06,
            fov_y: 65.0,
            distortion: RadialDistortion::default(),
        }
    }
}

impl ViewerParams {
    /// Total optical path length from the eye to the screen surface.
    pub fn eye_to_screen_distance(&self) -> f32 {
        self.eye_to_lens_distance + self.screen_to_lens_distance
    }
}

/// The full optical model: one screen, one viewer.
///
/// Owned by the render scheduler and replaced only through its serialized
/// update path; everything derived from it (field of view, viewports,
/// distortion meshes) is recomputed when either half changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hmd {
    pub screen: ScreenParams,
    pub viewer: ViewerParams,
}

impl Hmd {
    pub fn new(screen: ScreenParams, viewer: ViewerParams) -> Self {
        Self { screen, viewer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portrait_display_is_normalized_to_landscape() {
        let screen = ScreenParams::new(1080, 1920, 1e-4, 2e-4);
        assert_eq!(screen.width, 1920);
        assert_eq!(screen.height, 1080);
        // Pixel pitches travel with their axes.
        assert_eq!(screen.x_meters_per_pixel, 2e-4);
        assert_eq!(screen.y_meters_per_pixel, 1e-4);
    }

    #[test]
    fn landscape_display_is_untouched() {
        let screen = ScreenParams::new(1920, 1080, 2.5e-4, 2.5e-4);
        assert_eq!(screen.width, 1920);
        assert_eq!(screen.height, 1080);
        assert!((screen.width_meters() - 0.48).abs() < 1e-6);
        assert!((screen.height_meters() - 0.27).abs() < 1e-6);
    }

    #[test]
    fn display_metrics_convert_dpi_to_pixel_pitch() {
        let screen = ScreenParams::from_display_metrics(1920, 1080, 254.0, 254.0);
        assert!((screen.x_meters_per_pixel - 1e-4).abs() < 1e-9);
        assert_eq!(screen.border_size_meters, 0.003);
    }

    #[test]
    fn viewer_equality_is_exact() {
        let a = ViewerParams::default();
        let mut b = a;
        assert_eq!(a, b);
        b.interpupillary_distance += 1e-6;
        assert_ne!(a, b);
    }
}
