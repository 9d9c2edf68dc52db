//! Bounded byte ring standing in for the hardware buffer of a CPAL device.
//!
//! The feeder writes raw interleaved frames, the CPAL callback drains them. The ring keeps
//! ALSA-like bookkeeping: it knows whether the stream is running (data was written since
//! the last prepare) and flags an xrun when the callback finds it empty while running.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Thread-safe bounded frame queue with xrun tracking.
///
/// Capacity and all counts are in **frames**; storage is raw bytes.
pub struct FrameRing {
    frame_bytes: usize,
    capacity_frames: usize,
    inner: Mutex<RingInner>,
    cv: Condvar,
}

struct RingInner {
    queue: VecDeque<u8>,
    running: bool,
    xrun: bool,
}

/// Outcome of a [`FrameRing::push_blocking`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Written(usize),
    /// The ring drained while running; nothing was written.
    Xrun,
}

impl FrameRing {
    pub fn new(frame_bytes: usize, capacity_frames: usize) -> Self {
        let frame_bytes = frame_bytes.max(1);
        let capacity_frames = capacity_frames.max(1);
        Self {
            frame_bytes,
            capacity_frames,
            inner: Mutex::new(RingInner {
                queue: VecDeque::with_capacity(frame_bytes * capacity_frames),
                running: false,
                xrun: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Frames queued and not yet consumed.
    pub fn queued_frames(&self) -> usize {
        self.lock().queue.len() / self.frame_bytes
    }

    /// Frames that fit without blocking.
    pub fn free_frames(&self) -> usize {
        self.capacity_frames.saturating_sub(self.queued_frames())
    }

    /// Drop all queued data and stop the running state.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.queue.clear();
        g.running = false;
        drop(g);
        self.cv.notify_all();
    }

    /// Re-arm after a clear or an xrun.
    pub fn prepare(&self) {
        let mut g = self.lock();
        g.xrun = false;
        g.running = false;
    }

    /// Append whole frames from `data`, blocking while the ring is full.
    ///
    /// Fails without writing if an xrun is pending; call [`FrameRing::prepare`] first.
    pub fn push_blocking(&self, data: &[u8]) -> PushOutcome {
        let frames = data.len() / self.frame_bytes;
        let data = &data[..frames * self.frame_bytes];
        let cap_bytes = self.capacity_frames * self.frame_bytes;
        let mut offset = 0;

        while offset < data.len() {
            let mut g = self.lock();
            if g.xrun {
                return PushOutcome::Xrun;
            }
            while g.queue.len() + self.frame_bytes > cap_bytes && !g.xrun {
                g = match self.cv.wait(g) {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            if g.xrun {
                return PushOutcome::Xrun;
            }

            let room = (cap_bytes - g.queue.len()) / self.frame_bytes * self.frame_bytes;
            let take = room.min(data.len() - offset);
            g.queue.extend(&data[offset..offset + take]);
            g.running = true;
            offset += take;
        }
        PushOutcome::Written(frames)
    }

    /// Consumer side: fill `out` with up to `out.len()` bytes, returning how many were copied.
    ///
    /// A short read while running marks an xrun.
    pub fn pop_into(&self, out: &mut [u8]) -> usize {
        let mut g = self.lock();
        let n = out.len().min(g.queue.len());
        for (dst, src) in out.iter_mut().zip(g.queue.drain(..n)) {
            *dst = src;
        }
        if n < out.len() && g.running {
            g.xrun = true;
            g.running = false;
        }
        drop(g);
        self.cv.notify_all();
        n
    }

    fn lock(&self) -> MutexGuard<'_, RingInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
