//! Frame slot ring bookkeeping.
//!
//! Tracks which per-frame slot is being recorded and which are still owned
//! by the GPU. Kept free of Vulkan handles so the state machine can be
//! exercised directly; the render target drives it alongside the real
//! fences and semaphores.

use crate::error::{GpuError, Result};

/// Lifecycle of one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free for recording.
    Idle,
    /// Commands are being recorded into the slot.
    Recording,
    /// Submitted; the GPU still owns the slot until its fence signals.
    Submitted,
}

/// Fixed ring of frame slots advanced after each submission.
#[derive(Debug)]
pub struct FrameRing {
    states: Vec<SlotState>,
    current: usize,
}

impl FrameRing {
    pub fn new(slot_count: usize) -> Self {
        debug_assert!(slot_count > 0);
        Self {
            states: vec![SlotState::Idle; slot_count],
            current: 0,
        }
    }

    /// Index of the slot the next frame records into.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Whether beginning the current slot must first wait for the GPU to
    /// release it.
    pub fn needs_wait(&self) -> bool {
        self.states[self.current] == SlotState::Submitted
    }

    /// Record that the current slot's previous submission has been observed
    /// complete (its fence signaled).
    pub fn observe_complete(&mut self) {
        if self.states[self.current] == SlotState::Submitted {
            self.states[self.current] = SlotState::Idle;
        }
    }

    /// Record that every submitted slot has been observed complete (all
    /// fences waited, e.g. before a swapchain rebuild).
    pub fn observe_all_complete(&mut self) {
        for state in &mut self.states {
            if *state == SlotState::Submitted {
                *state = SlotState::Idle;
            }
        }
    }

    /// Begin recording into the current slot.
    ///
    /// The slot must be idle: a submitted slot needs its fence observed
    /// first, and a slot cannot be begun twice.
    pub fn begin(&mut self) -> Result<usize> {
        match self.states[self.current] {
            SlotState::Idle => {
                self.states[self.current] = SlotState::Recording;
                Ok(self.current)
            }
            SlotState::Recording => Err(GpuError::InvalidState(
                "Frame already being recorded".to_string(),
            )),
            SlotState::Submitted => Err(GpuError::InvalidState(
                "Frame slot still owned by the GPU".to_string(),
            )),
        }
    }

    /// Abandon a recording without submitting (rendering disabled
    /// mid-frame). The ring does not advance.
    pub fn abort(&mut self) {
        if self.states[self.current] == SlotState::Recording {
            self.states[self.current] = SlotState::Idle;
        }
    }

    /// Mark the current slot submitted and advance the ring. Returns the
    /// submitted slot index.
    pub fn submit(&mut self) -> Result<usize> {
        if self.states[self.current] != SlotState::Recording {
            return Err(GpuError::InvalidState(
                "No frame being recorded".to_string(),
            ));
        }

        let submitted = self.current;
        self.states[submitted] = SlotState::Submitted;
        // Advance only after the submission is on the queue.
        self.current = (self.current + 1) % self.states.len();
        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_submit_advances_ring() {
        let mut ring = FrameRing::new(2);

        assert_eq!(ring.begin().unwrap(), 0);
        assert_eq!(ring.submit().unwrap(), 0);
        assert_eq!(ring.current(), 1);

        assert_eq!(ring.begin().unwrap(), 1);
        assert_eq!(ring.submit().unwrap(), 1);
        assert_eq!(ring.current(), 0);
    }

    #[test]
    fn ring_wraps_modulo_slot_count() {
        let mut ring = FrameRing::new(3);
        for expected in [0, 1, 2, 0, 1] {
            ring.observe_complete();
            assert_eq!(ring.begin().unwrap(), expected);
            ring.submit().unwrap();
        }
    }

    #[test]
    fn submitted_slot_cannot_be_rerecorded_before_observation() {
        let mut ring = FrameRing::new(1);

        ring.begin().unwrap();
        ring.submit().unwrap();

        // Same slot again; the GPU still owns it.
        assert!(ring.needs_wait());
        assert!(ring.begin().is_err());

        ring.observe_complete();
        assert!(!ring.needs_wait());
        assert!(ring.begin().is_ok());
    }

    #[test]
    fn double_begin_is_rejected() {
        let mut ring = FrameRing::new(2);
        ring.begin().unwrap();
        assert!(ring.begin().is_err());
    }

    #[test]
    fn submit_without_begin_is_rejected() {
        let mut ring = FrameRing::new(2);
        assert!(ring.submit().is_err());
    }

    #[test]
    fn abort_frees_slot_without_advancing() {
        let mut ring = FrameRing::new(2);

        ring.begin().unwrap();
        ring.abort();

        assert_eq!(ring.current(), 0);
        assert_eq!(ring.state(0), SlotState::Idle);
        assert!(ring.begin().is_ok());
    }

    #[test]
    fn failed_submission_recovers_via_abort() {
        let mut ring = FrameRing::new(2);

        // A frame whose queue submission errored is aborted instead of
        // submitted; the next frame reuses the same slot normally.
        ring.begin().unwrap();
        ring.abort();

        assert_eq!(ring.begin().unwrap(), 0);
        assert_eq!(ring.submit().unwrap(), 0);
        assert_eq!(ring.current(), 1);
    }
}
