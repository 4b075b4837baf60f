// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Unit quad corners, counter-clockwise from bottom-left.
pub const QUAD_POSITIONS: [Vec4; 4] = [
    Vec4::new(-0.5, -0.5, 0.0, 1.0),
    Vec4::new(0.5, -0.5, 0.0, 1.0),
    Vec4::new(0.5, 0.5, 0.0, 1.0),
    Vec4::new(-0.5, 0.5, 0.0, 1.0),
];

pub const QUAD_TEX_COORDS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

pub fn quad_transform(position: Vec3, size: Vec2) -> Mat4 {
    Mat4::from_translation(position) * Mat4::from_scale(size.extend(1.0))
}

/// translate · rotateZ(rotation) · scale, rotation in radians.
pub fn rotated_quad_transform(position: Vec3, size: Vec2, rotation: f32) -> Mat4 {
    Mat4::from_scale_rotation_translation(size.extend(1.0), Quat::from_rotation_z(rotation), position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_scales_then_translates() {
        let m = quad_transform(Vec3::new(10.0, 5.0, 0.0), Vec2::new(4.0, 2.0));
        let top_right = m * QUAD_POSITIONS[2];
        assert_eq!(top_right, Vec4::new(12.0, 6.0, 0.0, 1.0));
    }

    #[test]
    fn zero_rotation_matches_plain_transform() {
        let p = Vec3::new(1.0, 2.0, 0.5);
        let s = Vec2::new(3.0, 3.0);
        assert!(rotated_quad_transform(p, s, 0.0).abs_diff_eq(quad_transform(p, s), 1e-6));
    }

    #[test]
    fn quarter_turn_rotates_corner() {
        let m = rotated_quad_transform(Vec3::ZERO, Vec2::ONE, std::f32::consts::FRAC_PI_2);
        let v = m * QUAD_POSITIONS[1];
        assert!(v.abs_diff_eq(Vec4::new(0.5, 0.5, 0.0, 1.0), 1e-6));
    }
}
