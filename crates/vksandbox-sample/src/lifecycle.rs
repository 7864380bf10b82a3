//! Frame slot state tracking.
//!
//! Each swapchain image has a slot that moves through
//! `Idle -> Acquired -> SetupSubmitted -> RenderSubmitted -> Presented -> Idle`.
//! The tracker also mirrors the slot's ready fence so a wait on a fence that
//! was never submitted is caught before it reaches the driver.

/// Where a frame slot is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquired,
    SetupSubmitted,
    RenderSubmitted,
    Presented,
}

impl FramePhase {
    /// Phase reached after the next step, if `self` allows one.
    fn successor(self) -> Self {
        match self {
            Self::Idle => Self::Acquired,
            Self::Acquired => Self::SetupSubmitted,
            Self::SetupSubmitted => Self::RenderSubmitted,
            Self::RenderSubmitted => Self::Presented,
            Self::Presented => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    phase: FramePhase,
    fence_pending: bool,
}

#[derive(Debug, Clone)]
pub struct SlotTracker {
    slots: Vec<SlotState>,
}

impl SlotTracker {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![
                SlotState {
                    phase: FramePhase::Idle,
                    fence_pending: false,
                };
                count
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn phase(&self, slot: usize) -> FramePhase {
        self.slots[slot].phase
    }

    pub fn fence_pending(&self, slot: usize) -> bool {
        self.slots[slot].fence_pending
    }

    fn advance(&mut self, slot: usize, expected: FramePhase) {
        let state = &mut self.slots[slot];
        assert_eq!(
            state.phase, expected,
            "frame slot {slot} cannot leave {:?}; it is {:?}",
            expected, state.phase
        );
        state.phase = expected.successor();
    }

    /// Record that the slot's fence has been handed to a queue submission.
    pub fn fence_submitted(&mut self, slot: usize) {
        let state = &mut self.slots[slot];
        assert!(
            !state.fence_pending,
            "frame slot {slot} fence submitted twice without a wait"
        );
        state.fence_pending = true;
    }

    /// Record a wait on the slot's fence; the fence is reset afterwards.
    pub fn wait_ready(&mut self, slot: usize) {
        let state = &mut self.slots[slot];
        assert!(
            state.fence_pending,
            "frame slot {slot} fence waited on but never submitted"
        );
        state.fence_pending = false;
    }

    /// Image index `slot` was returned by acquisition.
    pub fn acquired(&mut self, slot: usize) {
        self.advance(slot, FramePhase::Idle);
    }

    pub fn setup_submitted(&mut self, slot: usize) {
        self.advance(slot, FramePhase::Acquired);
    }

    pub fn render_submitted(&mut self, slot: usize) {
        self.advance(slot, FramePhase::SetupSubmitted);
    }

    pub fn presented(&mut self, slot: usize) {
        self.advance(slot, FramePhase::RenderSubmitted);
    }

    /// Slot is ready to be acquired again.
    pub fn recycled(&mut self, slot: usize) {
        self.advance(slot, FramePhase::Presented);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mirrors the driver's per-frame sequence against the tracker.
    fn run_frame(tracker: &mut SlotTracker, slot: usize) {
        tracker.acquired(slot);
        tracker.wait_ready(slot);
        tracker.setup_submitted(slot);
        tracker.render_submitted(slot);
        tracker.fence_submitted(slot);
        tracker.presented(slot);
        tracker.recycled(slot);
    }

    fn presignaled(count: usize) -> SlotTracker {
        let mut tracker = SlotTracker::new(count);
        for slot in 0..count {
            tracker.fence_submitted(slot);
        }
        tracker
    }

    #[test]
    fn round_robin_frames_never_wait_on_unsubmitted_fence() {
        let mut tracker = presignaled(3);
        for frame in 0..30 {
            run_frame(&mut tracker, frame % 3);
        }
        for slot in 0..3 {
            assert_eq!(tracker.phase(slot), FramePhase::Idle);
            assert!(tracker.fence_pending(slot));
        }
    }

    #[test]
    fn arbitrary_acquire_order_is_fine() {
        let mut tracker = presignaled(4);
        for slot in [2, 2, 0, 3, 1, 1, 1, 3, 0, 2] {
            run_frame(&mut tracker, slot);
        }
    }

    #[test]
    #[should_panic(expected = "never submitted")]
    fn missing_presignal_is_caught() {
        let mut tracker = SlotTracker::new(2);
        run_frame(&mut tracker, 0);
    }

    #[test]
    #[should_panic(expected = "cannot leave")]
    fn render_before_setup_panics() {
        let mut tracker = presignaled(1);
        tracker.acquired(0);
        tracker.render_submitted(0);
    }

    #[test]
    #[should_panic(expected = "submitted twice")]
    fn double_fence_submission_panics() {
        let mut tracker = SlotTracker::new(1);
        tracker.fence_submitted(0);
        tracker.fence_submitted(0);
    }

    #[test]
    #[should_panic(expected = "cannot leave")]
    fn acquiring_busy_slot_panics() {
        let mut tracker = presignaled(2);
        tracker.acquired(1);
        tracker.acquired(1);
    }
}
