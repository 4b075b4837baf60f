// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub tex_coord: [f32; 2],
    pub tex_index: f32,
    pub tiling_factor: f32,
    pub object_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    Float,
    Float2,
    Float3,
    Float4,
    UInt,
}

impl AttributeFormat {
    pub fn components(self) -> u32 {
        match self {
            Self::Float | Self::UInt => 1,
            Self::Float2 => 2,
            Self::Float3 => 3,
            Self::Float4 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: AttributeFormat,
    pub offset: u32,
}

impl QuadVertex {
    pub const STRIDE: u32 = size_of::<QuadVertex>() as u32;

    /// Shader input locations 0..=5, in field order.
    pub const ATTRIBUTES: [VertexAttribute; 6] = [
        VertexAttribute {
            location: 0,
            format: AttributeFormat::Float3,
            offset: offset_of!(QuadVertex, position) as u32,
        },
        VertexAttribute {
            location: 1,
            format: AttributeFormat::Float4,
            offset: offset_of!(QuadVertex, color) as u32,
        },
        VertexAttribute {
            location: 2,
            format: AttributeFormat::Float2,
            offset: offset_of!(QuadVertex, tex_coord) as u32,
        },
        VertexAttribute {
            location: 3,
            format: AttributeFormat::Float,
            offset: offset_of!(QuadVertex, tex_index) as u32,
        },
        VertexAttribute {
            location: 4,
            format: AttributeFormat::Float,
            offset: offset_of!(QuadVertex, tiling_factor) as u32,
        },
        VertexAttribute {
            location: 5,
            format: AttributeFormat::UInt,
            offset: offset_of!(QuadVertex, object_id) as u32,
        },
    ];
}

pub const QUAD_INDEX_PATTERN: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// Static index buffer contents for `max_quads` quads.
pub fn quad_indices(max_quads: u32) -> Vec<u32> {
    (0..max_quads)
        .flat_map(|q| QUAD_INDEX_PATTERN.map(|i| q * 4 + i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(QuadVertex::STRIDE, 48);
        let last = QuadVertex::ATTRIBUTES[5];
        assert_eq!(last.offset, 44);
    }

    #[test]
    fn indices_follow_fan_pattern() {
        let idx = quad_indices(2);
        assert_eq!(idx, vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]);
    }
}
