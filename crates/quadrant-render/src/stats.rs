// SPDX-License-Identifier: CEPL-1.0

/// Counters accumulated until the caller resets them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub draw_calls: u32,
    pub quad_count: u32,
}

impl RenderStats {
    pub fn vertex_count(&self) -> u32 {
        self.quad_count * 4
    }

    pub fn index_count(&self) -> u32 {
        self.quad_count * 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_counts() {
        let s = RenderStats { draw_calls: 1, quad_count: 3 };
        assert_eq!(s.vertex_count(), 12);
        assert_eq!(s.index_count(), 18);
    }
}
