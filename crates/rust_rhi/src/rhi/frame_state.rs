//! # Frame Lifecycle
//!
//! The per-frame call sequence is
//! `begin_frame → {bind*, push_constants, draw_indexed}* → end_frame → present`.
//! [`FrameLifecycle`] tracks where the device is in that sequence, the
//! deferred swapchain-stale flag, and the frame ring index.
//!
//! Out-of-order calls never panic. The device asks the lifecycle whether a
//! call is allowed and logs when it is not.

/// Position in the per-frame call sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame started yet, or the last frame was abandoned
    Idle,
    /// Image acquired, command buffer and frame pass open
    FrameBegun,
    /// At least one bind or draw recorded
    Recording,
    /// Command buffer submitted
    FrameEnded,
    /// Image queued for presentation
    Presented,
}

/// Frame state machine and ring position
#[derive(Debug, Clone)]
pub struct FrameLifecycle {
    state: FrameState,
    swapchain_stale: bool,
    frame_index: usize,
    ring_size: usize,
}

impl FrameLifecycle {
    /// New lifecycle for a ring of `ring_size` frames
    pub fn new(ring_size: usize) -> Self {
        Self {
            state: FrameState::Idle,
            swapchain_stale: false,
            frame_index: 0,
            ring_size: ring_size.max(1),
        }
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Ring slot used by the current (or next) frame
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Number of ring slots
    pub fn ring_size(&self) -> usize {
        self.ring_size
    }

    /// Request a swapchain rebuild at the next `begin_frame`
    pub fn mark_stale(&mut self) {
        self.swapchain_stale = true;
    }

    /// Whether a rebuild is pending
    pub fn is_stale(&self) -> bool {
        self.swapchain_stale
    }

    /// Clear the pending rebuild after servicing it
    pub fn clear_stale(&mut self) {
        self.swapchain_stale = false;
    }

    /// Whether a new frame may start
    pub fn can_begin(&self) -> bool {
        matches!(self.state, FrameState::Idle | FrameState::Presented)
    }

    /// A frame started recording
    pub fn begin(&mut self) {
        debug_assert!(self.can_begin(), "begin_frame called in {:?}", self.state);
        self.state = FrameState::FrameBegun;
    }

    /// The frame was dropped (acquire out of date, minimized, or a failed submit)
    pub fn abandon(&mut self) {
        self.state = FrameState::Idle;
    }

    /// Whether binds and draws may be recorded
    pub fn is_recording(&self) -> bool {
        matches!(self.state, FrameState::FrameBegun | FrameState::Recording)
    }

    /// A command was recorded into the open frame
    pub fn note_recorded(&mut self) {
        if self.state == FrameState::FrameBegun {
            self.state = FrameState::Recording;
        }
    }

    /// The command buffer was submitted
    pub fn end(&mut self) {
        self.state = FrameState::FrameEnded;
    }

    /// Whether `present` has a submitted frame to show
    pub fn can_present(&self) -> bool {
        self.state == FrameState::FrameEnded
    }

    /// Presentation was queued, successfully or not; move to the next ring slot
    pub fn presented(&mut self) {
        self.state = FrameState::Presented;
        self.frame_index = (self.frame_index + 1) % self.ring_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_frame(lifecycle: &mut FrameLifecycle) {
        assert!(lifecycle.can_begin());
        lifecycle.begin();
        lifecycle.note_recorded();
        assert_eq!(lifecycle.state(), FrameState::Recording);
        lifecycle.end();
        assert!(lifecycle.can_present());
        lifecycle.presented();
    }

    #[test]
    fn test_ring_index_wraps() {
        let mut lifecycle = FrameLifecycle::new(3);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(lifecycle.frame_index());
            run_frame(&mut lifecycle);
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    /// A skipped frame keeps its slot for the retry
    #[test]
    fn test_abandoned_frame_keeps_slot() {
        let mut lifecycle = FrameLifecycle::new(2);
        run_frame(&mut lifecycle);
        assert_eq!(lifecycle.frame_index(), 1);

        lifecycle.begin();
        lifecycle.abandon();
        assert_eq!(lifecycle.state(), FrameState::Idle);
        assert!(!lifecycle.is_recording());
        assert!(!lifecycle.can_present());
        assert_eq!(lifecycle.frame_index(), 1);
    }

    #[test]
    fn test_stale_flag() {
        let mut lifecycle = FrameLifecycle::new(2);
        assert!(!lifecycle.is_stale());
        lifecycle.mark_stale();
        lifecycle.mark_stale();
        assert!(lifecycle.is_stale());
        lifecycle.clear_stale();
        assert!(!lifecycle.is_stale());
    }

    #[test]
    fn test_recording_requires_begun_frame() {
        let mut lifecycle = FrameLifecycle::new(2);
        assert!(!lifecycle.is_recording());
        lifecycle.note_recorded();
        assert_eq!(lifecycle.state(), FrameState::Idle);
        lifecycle.begin();
        assert!(lifecycle.is_recording());
        lifecycle.end();
        assert!(!lifecycle.is_recording());
    }

    #[test]
    fn test_zero_ring_size_clamped() {
        let mut lifecycle = FrameLifecycle::new(0);
        run_frame(&mut lifecycle);
        assert_eq!(lifecycle.frame_index(), 0);
        assert_eq!(lifecycle.ring_size(), 1);
    }
}
