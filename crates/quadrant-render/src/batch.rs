// SPDX-License-Identifier: CEPL-1.0
use quadrant_core::contract;
use quadrant_math::{Mat4, Vec4, QUAD_POSITIONS, QUAD_TEX_COORDS};

use crate::texture::TextureId;
use crate::vertex::QuadVertex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_quads: u32,
    pub max_texture_slots: u32,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_quads: 10_000,
            max_texture_slots: 32,
        }
    }
}

impl BatchLimits {
    pub fn max_vertices(&self) -> u32 {
        self.max_quads * 4
    }

    pub fn max_indices(&self) -> u32 {
        self.max_quads * 6
    }

    /// Component-wise minimum, used to fit requested limits to what a device supports.
    pub fn constrain(self, device: BatchLimits) -> Self {
        Self {
            max_quads: self.max_quads.min(device.max_quads).max(1),
            max_texture_slots: self.max_texture_slots.min(device.max_texture_slots).max(1),
        }
    }
}

/// Per-scene vertex scratch space plus the texture slot table.
///
/// The vertex storage is allocated once; pushing a quad only writes into it
/// and moves the cursor. Slot 0 always holds the white texture.
pub struct BatchAccumulator {
    limits: BatchLimits,
    vertices: Box<[QuadVertex]>,
    cursor: usize,
    index_count: u32,
    slots: Vec<TextureId>,
    view_projection: Mat4,
}

impl BatchAccumulator {
    pub fn new(limits: BatchLimits, white: TextureId) -> Self {
        let mut slots = Vec::with_capacity(limits.max_texture_slots as usize);
        slots.push(white);
        Self {
            limits,
            vertices: vec![QuadVertex::default(); limits.max_vertices() as usize].into_boxed_slice(),
            cursor: 0,
            index_count: 0,
            slots,
            view_projection: Mat4::IDENTITY,
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Starts a scene: empties the batch and records the matrix used for every flush of it.
    pub fn begin(&mut self, view_projection: Mat4) {
        self.view_projection = view_projection;
        self.reset();
    }

    /// Empties the batch but keeps the scene's view-projection.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.index_count = 0;
        self.slots.truncate(1);
    }

    pub fn view_projection(&self) -> Mat4 {
        self.view_projection
    }

    pub fn is_empty(&self) -> bool {
        self.index_count == 0
    }

    /// True when one more quad would exceed the index budget.
    pub fn is_full(&self) -> bool {
        self.index_count + 6 > self.limits.max_indices()
    }

    pub fn slot_of(&self, texture: TextureId) -> Option<u32> {
        self.slots.iter().position(|&t| t == texture).map(|i| i as u32)
    }

    pub fn slots_full(&self) -> bool {
        self.slots.len() >= self.limits.max_texture_slots as usize
    }

    pub fn assign_slot(&mut self, texture: TextureId) -> u32 {
        contract!(!self.slots_full(), "texture slot table overflow");
        let slot = self.slots.len() as u32;
        self.slots.push(texture);
        slot
    }

    /// Next free slot; 1 right after a reset.
    pub fn texture_slot_index(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn texture_slots(&self) -> &[TextureId] {
        &self.slots
    }

    /// Appends four vertices and six indices.
    pub fn push_quad(
        &mut self,
        transform: &Mat4,
        color: Vec4,
        tex_index: f32,
        tiling_factor: f32,
        object_id: u32,
    ) {
        if !contract!(!self.is_full(), "push_quad on a full batch") {
            return;
        }
        let quad = &mut self.vertices[self.cursor..self.cursor + 4];
        for (i, v) in quad.iter_mut().enumerate() {
            *v = QuadVertex {
                position: (*transform * QUAD_POSITIONS[i]).truncate().to_array(),
                color: color.to_array(),
                tex_coord: QUAD_TEX_COORDS[i],
                tex_index,
                tiling_factor,
                object_id,
            };
        }
        self.cursor += 4;
        self.index_count += 6;
    }

    pub fn vertices(&self) -> &[QuadVertex] {
        &self.vertices[..self.cursor]
    }

    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.vertices())
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn quad_count(&self) -> u32 {
        self.index_count / 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadrant_math::{quad_transform, Vec2, Vec3};

    fn small() -> BatchAccumulator {
        BatchAccumulator::new(
            BatchLimits {
                max_quads: 4,
                max_texture_slots: 3,
            },
            TextureId::next(),
        )
    }

    #[test]
    fn counts_grow_per_quad() {
        let mut b = small();
        b.begin(Mat4::IDENTITY);
        for n in 1..=3 {
            b.push_quad(&Mat4::IDENTITY, Vec4::ONE, 0.0, 1.0, 7);
            assert_eq!(b.vertices().len(), 4 * n);
            assert_eq!(b.index_count(), 6 * n as u32);
        }
        assert_eq!(b.byte_len(), 3 * 4 * 48);
    }

    #[test]
    fn full_after_capacity() {
        let mut b = small();
        b.begin(Mat4::IDENTITY);
        for _ in 0..4 {
            assert!(!b.is_full());
            b.push_quad(&Mat4::IDENTITY, Vec4::ONE, 0.0, 1.0, 0);
        }
        assert!(b.is_full());
        b.reset();
        assert!(b.is_empty());
        assert!(!b.is_full());
    }

    #[test]
    fn vertices_are_transformed() {
        let mut b = small();
        b.begin(Mat4::IDENTITY);
        let t = quad_transform(Vec3::new(1.0, 1.0, 0.0), Vec2::splat(2.0));
        b.push_quad(&t, Vec4::new(1.0, 0.0, 0.0, 1.0), 2.0, 3.0, 9);
        let v = b.vertices();
        assert_eq!(v[0].position, [0.0, 0.0, 0.0]);
        assert_eq!(v[2].position, [2.0, 2.0, 0.0]);
        assert_eq!(v[2].tex_coord, [1.0, 1.0]);
        assert_eq!(v[3].tex_index, 2.0);
        assert_eq!(v[3].tiling_factor, 3.0);
        assert_eq!(v[1].object_id, 9);
    }

    #[test]
    fn slot_table_starts_after_white() {
        let mut b = small();
        b.begin(Mat4::IDENTITY);
        assert_eq!(b.texture_slot_index(), 1);
        let t = TextureId::next();
        assert_eq!(b.slot_of(t), None);
        assert_eq!(b.assign_slot(t), 1);
        assert_eq!(b.slot_of(t), Some(1));
        assert_eq!(b.slot_of(b.texture_slots()[0]), Some(0));
        b.assign_slot(TextureId::next());
        assert!(b.slots_full());
        b.begin(Mat4::IDENTITY);
        assert_eq!(b.texture_slot_index(), 1);
    }

    #[test]
    fn reset_keeps_view_projection() {
        let mut b = small();
        let vp = Mat4::from_scale(Vec3::splat(2.0));
        b.begin(vp);
        b.push_quad(&Mat4::IDENTITY, Vec4::ONE, 0.0, 1.0, 0);
        b.reset();
        assert_eq!(b.view_projection(), vp);
    }

    #[test]
    fn constrain_takes_minimum() {
        let l = BatchLimits::default().constrain(BatchLimits {
            max_quads: 50_000,
            max_texture_slots: 16,
        });
        assert_eq!(l.max_quads, 10_000);
        assert_eq!(l.max_texture_slots, 16);
        assert_eq!(l.max_indices(), 60_000);
    }
}
