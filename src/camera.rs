//! Orbit camera around the globe.

use glam::{Mat4, Quat, Vec3};

const ORBIT_RADIANS_PER_PIXEL: f32 = 0.001;
const ZOOM_FRACTION_PER_STEP: f32 = 0.1;
const FOVY_DEGREES: f32 = 60.0;
const NEAR_PLANE: f32 = 0.01;
const FAR_PLANE: f32 = 1000.0;

/// Camera orbiting the origin with +Y up. Dragging rotates the eye around
/// the up axis and the camera-right axis; scrolling moves the eye along the
/// view direction by a fraction of its current distance, so zoom speed
/// scales with how far out the camera is.
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    position: Vec3,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 4.0),
        }
    }
}

impl OrbitCamera {
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn distance(&self) -> f32 {
        self.position.length()
    }

    /// Apply a pointer drag in pixels.
    pub fn orbit(&mut self, delta_x: f32, delta_y: f32) {
        let yaw = Quat::from_axis_angle(Vec3::Y, -delta_x * ORBIT_RADIANS_PER_PIXEL);
        self.position = yaw * self.position;

        let view = -self.position.normalize_or_zero();
        let right = view.cross(Vec3::Y);
        // Looking straight down a pole leaves no usable right axis.
        if right.length_squared() > 1e-12 {
            let pitch =
                Quat::from_axis_angle(right.normalize(), -delta_y * ORBIT_RADIANS_PER_PIXEL);
            self.position = pitch * self.position;
        }
    }

    /// Apply scroll steps; positive steps zoom in.
    pub fn zoom(&mut self, steps: f32) {
        let scale = (1.0 - steps * ZOOM_FRACTION_PER_STEP).max(0.05);
        self.position *= scale;
    }

    /// Perspective times look-at for the current eye position.
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        let projection = Mat4::perspective_rh_gl(
            FOVY_DEGREES.to_radians(),
            aspect,
            NEAR_PLANE,
            FAR_PLANE,
        );
        let view = Mat4::look_at_rh(self.position, Vec3::ZERO, Vec3::Y);
        projection * view
    }
}
