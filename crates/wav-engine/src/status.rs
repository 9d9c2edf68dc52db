//! Transport state shared between the feeder thread and callers.
//!
//! Only the feeder writes these fields. Readers never lock: a read may be one poll
//! period stale but is never torn.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Transport request consumed by the feeder loop, one per poll period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    /// Seek to `target_ms`; clamped to the end of the payload.
    Jump { target_ms: u32 },
}

/// Coarse transport state derived from the status flags.
///
/// Stopped and paused share the same flag encoding and differ only in position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Paused,
    Playing,
}

/// Lock-free status published by the feeder.
#[derive(Debug, Default)]
pub struct SharedStatus {
    playing: AtomicBool,
    paused: AtomicBool,
    current_frame: AtomicU32,
}

impl SharedStatus {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TransportState {
        if self.is_playing() {
            TransportState::Playing
        } else if self.current_frame() == 0 {
            TransportState::Stopped
        } else {
            TransportState::Paused
        }
    }

    pub(crate) fn set_playing(&self) {
        self.paused.store(false, Ordering::Release);
        self.playing.store(true, Ordering::Release);
    }

    /// Paused and stopped both land here.
    pub(crate) fn set_halted(&self) {
        self.playing.store(false, Ordering::Release);
        self.paused.store(true, Ordering::Release);
    }

    pub(crate) fn publish_frame(&self, frame: u32) {
        self.current_frame.store(frame, Ordering::Release);
    }
}
