// SPDX-License-Identifier: CEPL-1.0
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TEXTURE: AtomicU64 = AtomicU64::new(1);

/// Identity of a GPU texture. Two handles share a slot only if their ids match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    pub fn next() -> Self {
        Self(NEXT_TEXTURE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureHandle {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = TextureId::next();
        let b = TextureId::next();
        assert_ne!(a, b);
    }
}
