//! Predicted head pose and its derived views.

use glam::{Mat4, Quat, Vec3};

const GIMBAL_LOCK_EPSILON: f32 = 0.01;

/// A predicted head pose, stored as the head view matrix the renderer
/// consumes. The rotation part is orthonormal; every accessor derives its
/// value from the matrix on demand so they can never drift apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadTransform {
    head_view: Mat4,
}

impl Default for HeadTransform {
    fn default() -> Self {
        Self {
            head_view: Mat4::IDENTITY,
        }
    }
}

impl HeadTransform {
    pub fn new(head_view: Mat4) -> Self {
        Self { head_view }
    }

    pub fn head_view(&self) -> &Mat4 {
        &self.head_view
    }

    pub fn translation(&self) -> Vec3 {
        self.head_view.w_axis.truncate()
    }

    /// Direction the head is looking, in world space.
    pub fn forward(&self) -> Vec3 {
        -self.head_view.row(2).truncate()
    }

    pub fn up(&self) -> Vec3 {
        self.head_view.row(1).truncate()
    }

    pub fn right(&self) -> Vec3 {
        self.head_view.row(0).truncate()
    }

    pub fn quaternion(&self) -> Quat {
        Quat::from_mat4(&self.head_view)
    }

    /// (pitch, yaw, roll) in radians.
    ///
    /// Near the poles (|pitch| -> 90 degrees) yaw and roll become
    /// degenerate; yaw is reported as zero there and the remaining rotation
    /// is attributed to roll.
    pub fn euler_angles(&self) -> Vec3 {
        let m = &self.head_view;
        let sin_pitch = m.y_axis.z;
        let pitch = sin_pitch.asin();
        let (yaw, roll) = if (1.0 - sin_pitch * sin_pitch).sqrt() >= GIMBAL_LOCK_EPSILON {
            (
                (-m.x_axis.z).atan2(m.z_axis.z),
                (-m.y_axis.x).atan2(m.y_axis.y),
            )
        } else {
            (0.0, m.x_axis.y.atan2(m.x_axis.x))
        };
        Vec3::new(-pitch, -yaw, -roll)
    }
}
