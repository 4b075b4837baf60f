// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight.
//!
//! Two index spaces live here and must not be mixed up: [`FrameIndex`] walks
//! the fixed ring of per-frame sync objects, [`ImageIndex`] names a swapchain
//! image as handed out by the presentation engine. The ring keeps one table
//! for each: ring-indexed slot states and image-indexed owners.
use quadrant_core::contract;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameIndex(usize);

impl FrameIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageIndex(u32);

impl ImageIndex {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence known signaled, nothing recorded.
    Idle,
    AcquireRequested,
    Acquired(ImageIndex),
    /// Commands submitted; the fence may still be unsignaled.
    Submitted(ImageIndex),
}

pub struct FrameRing {
    slots: Vec<SlotState>,
    image_owners: Vec<Option<FrameIndex>>,
    current: usize,
}

impl FrameRing {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        let frames = frames_in_flight.max(1);
        Self {
            slots: vec![SlotState::Idle; frames],
            image_owners: vec![None; image_count],
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn current(&self) -> FrameIndex {
        FrameIndex(self.current)
    }

    pub fn state(&self, frame: FrameIndex) -> SlotState {
        self.slots[frame.0]
    }

    pub fn owner_of(&self, image: ImageIndex) -> Option<FrameIndex> {
        self.image_owners.get(image.slot()).copied().flatten()
    }

    /// The frame's fence has been waited on.
    pub fn mark_complete(&mut self, frame: FrameIndex) {
        if let SlotState::Submitted(_) = self.slots[frame.0] {
            self.slots[frame.0] = SlotState::Idle;
        }
    }

    pub fn begin_acquire(&mut self) {
        let slot = &mut self.slots[self.current];
        contract!(
            *slot == SlotState::Idle,
            "acquire on frame {} in state {:?}",
            self.current,
            slot
        );
        *slot = SlotState::AcquireRequested;
    }

    /// Stale surface: nothing was acquired, the slot goes back to idle.
    pub fn cancel_acquire(&mut self) {
        self.slots[self.current] = SlotState::Idle;
    }

    /// A different ring slot that still has `image` in flight.
    pub fn conflicting_owner(&self, image: ImageIndex) -> Option<FrameIndex> {
        let owner = self.owner_of(image)?;
        match self.slots[owner.0] {
            SlotState::Submitted(_) if owner.0 != self.current => Some(owner),
            _ => None,
        }
    }

    pub fn claim_image(&mut self, image: ImageIndex) {
        if image.slot() >= self.image_owners.len() {
            self.image_owners.resize(image.slot() + 1, None);
        }
        self.image_owners[image.slot()] = Some(FrameIndex(self.current));
        self.slots[self.current] = SlotState::Acquired(image);
    }

    pub fn image(&self) -> Option<ImageIndex> {
        match self.slots[self.current] {
            SlotState::Acquired(i) | SlotState::Submitted(i) => Some(i),
            _ => None,
        }
    }

    pub fn mark_submitted(&mut self) {
        let slot = &mut self.slots[self.current];
        match *slot {
            SlotState::Acquired(image) => *slot = SlotState::Submitted(image),
            other => {
                contract!(false, "submit on frame {} in state {:?}", self.current, other);
            }
        }
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn in_flight_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, SlotState::Submitted(_)))
            .count()
    }

    /// After the device went idle and the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        for slot in &mut self.slots {
            if let SlotState::Submitted(_) = slot {
                *slot = SlotState::Idle;
            }
        }
        self.image_owners.clear();
        self.image_owners.resize(image_count, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_frame(ring: &mut FrameRing, image: u32) {
        let f = ring.current();
        ring.mark_complete(f);
        ring.begin_acquire();
        ring.claim_image(ImageIndex::new(image));
        ring.mark_submitted();
        ring.advance();
    }

    #[test]
    fn ring_wraps() {
        let mut ring = FrameRing::new(2, 3);
        run_frame(&mut ring, 0);
        run_frame(&mut ring, 1);
        assert_eq!(ring.current(), FrameIndex::new(0));
        assert_eq!(ring.in_flight_count(), 2);
    }

    #[test]
    fn image_owned_by_other_frame_conflicts() {
        let mut ring = FrameRing::new(2, 3);
        run_frame(&mut ring, 0);
        // frame 1 now gets image 0 back while frame 0 is still in flight
        assert_eq!(ring.conflicting_owner(ImageIndex::new(0)), Some(FrameIndex::new(0)));
        ring.mark_complete(FrameIndex::new(0));
        assert_eq!(ring.conflicting_owner(ImageIndex::new(0)), None);
    }

    #[test]
    fn own_image_is_not_a_conflict() {
        let mut ring = FrameRing::new(1, 2);
        run_frame(&mut ring, 1);
        assert_eq!(ring.conflicting_owner(ImageIndex::new(1)), None);
    }

    #[test]
    fn cancel_returns_to_idle() {
        let mut ring = FrameRing::new(2, 2);
        ring.begin_acquire();
        assert_eq!(ring.state(ring.current()), SlotState::AcquireRequested);
        ring.cancel_acquire();
        assert_eq!(ring.state(ring.current()), SlotState::Idle);
        assert_eq!(ring.image(), None);
    }

    #[test]
    fn reset_images_forgets_owners() {
        let mut ring = FrameRing::new(2, 2);
        run_frame(&mut ring, 1);
        ring.reset_images(4);
        assert_eq!(ring.owner_of(ImageIndex::new(1)), None);
        assert_eq!(ring.in_flight_count(), 0);
    }
}
