//! Persist gate
//!
//! Per-turn state machine `streaming -> ready -> saving -> saved` that
//! lets exactly one of the inline path and the cleanup path write a
//! completed turn.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    /// Reply still being generated; nothing may be saved
    Streaming = 0,
    /// Reply complete, waiting for a writer to claim it
    Ready = 1,
    /// Claimed by a writer
    Saving = 2,
    /// Write finished, successfully or not
    Saved = 3,
}

impl GateState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Streaming,
            1 => Self::Ready,
            2 => Self::Saving,
            _ => Self::Saved,
        }
    }
}

#[derive(Debug)]
pub struct PersistGate {
    state: AtomicU8,
}

impl Default for PersistGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GateState::Streaming as u8),
        }
    }

    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `streaming -> ready`; returns false if the gate had already moved on
    pub fn mark_ready(&self) -> bool {
        self.transition(GateState::Streaming, GateState::Ready)
    }

    /// `ready -> saving`; true for the single caller that wins the claim
    pub fn try_claim(&self) -> bool {
        self.transition(GateState::Ready, GateState::Saving)
    }

    pub fn mark_saved(&self) {
        self.state.store(GateState::Saved as u8, Ordering::Release);
    }

    fn transition(&self, from: GateState, to: GateState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
