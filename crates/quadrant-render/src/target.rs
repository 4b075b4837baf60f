// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use quadrant_math::Vec4;

use crate::error::{RenderError, Result};
use crate::frame::ImageIndex;
use crate::texture::TextureHandle;
use crate::RenderSize;

static NEXT_TARGET: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTargetId(u64);

impl RenderTargetId {
    pub fn next() -> Self {
        Self(NEXT_TARGET.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub clear_color: Vec4,
}

/// An offscreen destination. `texture` samples its color attachment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderTargetHandle {
    pub id: RenderTargetId,
    pub extent: RenderSize,
    pub texture: TextureHandle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    Clear,
    Draw,
    Overlay,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn from_extent(extent: RenderSize) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassTarget {
    Swapchain(ImageIndex),
    Offscreen(RenderTargetId),
}

/// Everything a device needs to open one render pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedPass {
    pub kind: PassKind,
    pub target: PassTarget,
    pub extent: RenderSize,
    pub viewport: Viewport,
    pub clear_color: Vec4,
}

struct TargetEntry {
    extent: RenderSize,
    clear_color: Vec4,
}

/// Picks the destination of each pass: the active offscreen target if any,
/// the current swapchain image otherwise.
pub struct TargetRouter {
    targets: HashMap<RenderTargetId, TargetEntry>,
    active: Option<RenderTargetId>,
    swapchain_extent: RenderSize,
    clear_color: Vec4,
}

impl TargetRouter {
    pub fn new(swapchain_extent: RenderSize, clear_color: Vec4) -> Self {
        Self {
            targets: HashMap::new(),
            active: None,
            swapchain_extent,
            clear_color,
        }
    }

    pub fn register(&mut self, handle: &RenderTargetHandle, desc: &RenderTargetDesc) {
        self.targets.insert(
            handle.id,
            TargetEntry {
                extent: handle.extent,
                clear_color: desc.clear_color,
            },
        );
    }

    /// Returns false for an unknown id. Unregistering the active target falls back to the swapchain.
    pub fn unregister(&mut self, id: RenderTargetId) -> bool {
        if self.active == Some(id) {
            self.active = None;
        }
        self.targets.remove(&id).is_some()
    }

    pub fn contains(&self, id: RenderTargetId) -> bool {
        self.targets.contains_key(&id)
    }

    pub fn activate(&mut self, id: RenderTargetId) -> Result<()> {
        if !self.targets.contains_key(&id) {
            return Err(RenderError::InvalidArgument(format!(
                "unknown render target {}",
                id.raw()
            )));
        }
        self.active = Some(id);
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<RenderTargetId> {
        self.active
    }

    pub fn swapchain_extent(&self) -> RenderSize {
        self.swapchain_extent
    }

    pub fn set_swapchain_extent(&mut self, extent: RenderSize) {
        self.swapchain_extent = extent;
    }

    pub fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    /// Sets the default clear color, and the active target's if one is bound.
    pub fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
        if let Some(entry) = self.active.and_then(|id| self.targets.get_mut(&id)) {
            entry.clear_color = color;
        }
    }

    pub fn extent(&self) -> RenderSize {
        self.active_entry()
            .map_or(self.swapchain_extent, |(_, entry)| entry.extent)
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::from_extent(self.extent())
    }

    pub fn resolve(&self, kind: PassKind, image: ImageIndex) -> ResolvedPass {
        match self.active_entry() {
            // overlay belongs to the presented image only
            Some((id, entry)) if kind != PassKind::Overlay => ResolvedPass {
                kind,
                target: PassTarget::Offscreen(id),
                extent: entry.extent,
                viewport: Viewport::from_extent(entry.extent),
                clear_color: entry.clear_color,
            },
            _ => self.resolve_swapchain(kind, image),
        }
    }

    pub fn resolve_swapchain(&self, kind: PassKind, image: ImageIndex) -> ResolvedPass {
        ResolvedPass {
            kind,
            target: PassTarget::Swapchain(image),
            extent: self.swapchain_extent,
            viewport: Viewport::from_extent(self.swapchain_extent),
            clear_color: self.clear_color,
        }
    }

    fn active_entry(&self) -> Option<(RenderTargetId, &TargetEntry)> {
        let id = self.active?;
        self.targets.get(&id).map(|e| (id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureId;

    fn target(w: u32, h: u32) -> (RenderTargetHandle, RenderTargetDesc) {
        let desc = RenderTargetDesc {
            width: w,
            height: h,
            clear_color: Vec4::new(1.0, 0.0, 0.0, 1.0),
        };
        let handle = RenderTargetHandle {
            id: RenderTargetId::next(),
            extent: RenderSize::new(w, h),
            texture: TextureHandle {
                id: TextureId::next(),
                width: w,
                height: h,
            },
        };
        (handle, desc)
    }

    #[test]
    fn offscreen_target_owns_viewport() {
        let mut r = TargetRouter::new(RenderSize::new(800, 600), Vec4::ZERO);
        let (h, d) = target(256, 128);
        r.register(&h, &d);
        r.activate(h.id).unwrap();
        assert_eq!(r.viewport(), Viewport::from_extent(RenderSize::new(256, 128)));
        let pass = r.resolve(PassKind::Draw, ImageIndex::new(0));
        assert_eq!(pass.target, PassTarget::Offscreen(h.id));
        assert_eq!(pass.clear_color, d.clear_color);
        r.deactivate();
        assert_eq!(r.viewport(), Viewport::from_extent(RenderSize::new(800, 600)));
    }

    #[test]
    fn clear_and_draw_follow_active_target() {
        let mut r = TargetRouter::new(RenderSize::new(800, 600), Vec4::ZERO);
        let (h, d) = target(32, 16);
        r.register(&h, &d);
        r.activate(h.id).unwrap();
        for kind in [PassKind::Clear, PassKind::Draw] {
            let pass = r.resolve(kind, ImageIndex::new(1));
            assert_eq!(pass.kind, kind);
            assert_eq!(pass.target, PassTarget::Offscreen(h.id));
            assert_eq!(pass.extent, RenderSize::new(32, 16));
        }
    }

    #[test]
    fn overlay_always_targets_swapchain() {
        let mut r = TargetRouter::new(RenderSize::new(800, 600), Vec4::ZERO);
        let (h, d) = target(64, 64);
        r.register(&h, &d);
        r.activate(h.id).unwrap();
        let pass = r.resolve(PassKind::Overlay, ImageIndex::new(2));
        assert_eq!(pass.target, PassTarget::Swapchain(ImageIndex::new(2)));
    }

    #[test]
    fn clear_color_follows_active_target() {
        let mut r = TargetRouter::new(RenderSize::new(8, 8), Vec4::ZERO);
        let (h, d) = target(4, 4);
        r.register(&h, &d);
        r.activate(h.id).unwrap();
        r.set_clear_color(Vec4::ONE);
        assert_eq!(r.resolve(PassKind::Clear, ImageIndex::new(0)).clear_color, Vec4::ONE);
        r.deactivate();
        assert_eq!(r.clear_color(), Vec4::ONE);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let mut r = TargetRouter::new(RenderSize::new(8, 8), Vec4::ZERO);
        assert!(matches!(
            r.activate(RenderTargetId::next()),
            Err(RenderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unregistering_active_target_falls_back() {
        let mut r = TargetRouter::new(RenderSize::new(8, 8), Vec4::ZERO);
        let (h, d) = target(4, 4);
        r.register(&h, &d);
        r.activate(h.id).unwrap();
        assert!(r.unregister(h.id));
        assert_eq!(r.active(), None);
        assert!(!r.unregister(h.id));
    }
}
