// SPDX-License-Identifier: CEPL-1.0
pub mod camera;
pub mod quad;

pub use camera::{Camera, OrthoCamera};
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
pub use quad::{quad_transform, rotated_quad_transform, QUAD_POSITIONS, QUAD_TEX_COORDS};
