//! Polynomial radial lens distortion.
//!
//! The lens magnifies radially: a point at physical radius `r` meters from
//! the optical axis appears at `r * (1 + k1*r^2 + k2*r^4)`. The forward map
//! is exact; the inverse is solved numerically with a secant iteration,
//! which converges in a handful of steps for lens-scale radii.

/// Radial distortion model with two even polynomial coefficients.
///
/// Radii are meters on the screen surface. The default coefficients model
/// the reference viewer's biconvex lenses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialDistortion {
    pub coefficients: [f32; 2],
}

impl Default for RadialDistortion {
    fn default() -> Self {
        Self {
            coefficients: [250.0, 50000.0],
        }
    }
}

impl RadialDistortion {
    pub fn new(coefficients: [f32; 2]) -> Self {
        Self { coefficients }
    }

    /// Magnification factor at `radius`: `distort(r) = r * distortion_factor(r)`.
    pub fn distortion_factor(&self, radius: f32) -> f32 {
        let r_squared = radius * radius;
        let mut r_factor = 1.0;
        let mut result = 1.0;
        for k in self.coefficients {
            r_factor *= r_squared;
            result += k * r_factor;
        }
        result
    }

    /// Maps an undistorted radius to the radius it appears at through the lens.
    pub fn distort(&self, radius: f32) -> f32 {
        radius * self.distortion_factor(radius)
    }

    /// Numerical inverse of [`distort`](Self::distort), via the secant method.
    ///
    /// Monotonicity of the forward map on the working range keeps the
    /// iteration stable; the two initial guesses bracket the undistorted
    /// radius from both sides.
    pub fn distort_inverse(&self, radius: f32) -> f32 {
        let mut r0 = radius / 0.9;
        let mut r1 = radius * 0.9;
        let mut dr0 = radius - self.distort(r0);
        while (r1 - r0).abs() > 0.0001 {
            let dr1 = radius - self.distort(r1);
            let r2 = r1 - dr1 * ((r1 - r0) / (dr1 - dr0));
            r0 = r1;
            r1 = r2;
            dr0 = dr1;
        }
        r1
    }
}
