// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};

/// A bare projection. The view comes from whoever places the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub projection: Mat4,
}

impl Camera {
    pub fn new(projection: Mat4) -> Self {
        Self { projection }
    }

    /// projection · inverse(transform)
    pub fn view_projection(&self, transform: &Mat4) -> Mat4 {
        self.projection * transform.inverse()
    }
}

#[derive(Clone, Debug)]
pub struct OrthoCamera {
    projection: Mat4,
    view: Mat4,
    position: Vec3,
    rotation: f32,
}

impl OrthoCamera {
    pub fn new(left: f32, right: f32, bottom: f32, top: f32) -> Self {
        Self {
            projection: Mat4::orthographic_rh(left, right, bottom, top, -1.0, 1.0),
            view: Mat4::IDENTITY,
            position: Vec3::ZERO,
            rotation: 0.0,
        }
    }

    pub fn set_projection(&mut self, left: f32, right: f32, bottom: f32, top: f32) {
        self.projection = Mat4::orthographic_rh(left, right, bottom, top, -1.0, 1.0);
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.recalculate_view();
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn set_rotation(&mut self, radians: f32) {
        self.rotation = radians;
        self.recalculate_view();
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    fn recalculate_view(&mut self) {
        let transform = Mat4::from_translation(self.position) * Mat4::from_rotation_z(self.rotation);
        self.view = transform.inverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec4, Vec4Swizzles};

    #[test]
    fn camera_inverts_transform() {
        let cam = Camera::new(Mat4::IDENTITY);
        let t = Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0));
        let p = cam.view_projection(&t) * Vec4::new(3.0, 0.0, 0.0, 1.0);
        assert!(p.abs_diff_eq(Vec4::new(0.0, 0.0, 0.0, 1.0), 1e-6));
    }

    #[test]
    fn ortho_maps_bounds_to_ndc() {
        let cam = OrthoCamera::new(0.0, 800.0, 0.0, 600.0);
        let corner = cam.view_projection() * Vec4::new(800.0, 600.0, 0.0, 1.0);
        assert!(corner.xy().abs_diff_eq(Vec2::new(1.0, 1.0), 1e-5));
    }

    #[test]
    fn moving_the_camera_shifts_the_world() {
        let mut cam = OrthoCamera::new(-1.0, 1.0, -1.0, 1.0);
        cam.set_position(Vec3::new(0.5, 0.0, 0.0));
        let p = cam.view_projection() * Vec4::new(0.5, 0.0, 0.0, 1.0);
        assert!(p.xy().abs_diff_eq(Vec2::ZERO, 1e-6));
        assert_eq!(cam.position(), Vec3::new(0.5, 0.0, 0.0));
    }
}
