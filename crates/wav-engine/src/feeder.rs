//! Feeder loop: the background worker that owns the output device.
//!
//! Every poll period the feeder
//! 1. applies at most one pending transport command and completes its rendezvous,
//! 2. sleeps for the poll period,
//! 3. tops up the device buffer from the payload once more than half of it is free.
//!
//! The state machine ([`Feeder::apply`], [`Feeder::write_step`]) is independent of the
//! thread and channel plumbing in [`Feeder::run`], so it can be driven directly.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::device::{PcmDevice, WriteError};
use crate::riff::PcmDescriptor;
use crate::status::{Command, SharedStatus};

/// A transport command in flight from a caller to the feeder.
pub(crate) struct Request {
    pub command: Command,
    /// Third-party barrier released right after the command is applied.
    pub sync: Option<Arc<Barrier>>,
    /// Zero-capacity completion channel; the send is the caller/feeder rendezvous.
    pub done: Sender<()>,
}

pub struct Feeder<D: PcmDevice> {
    device: D,
    audio: Arc<[u8]>,
    payload: Range<usize>,
    descriptor: PcmDescriptor,
    buffer_frames: usize,
    poll_period: Duration,
    status: Arc<SharedStatus>,
    playing: bool,
    current_frame: u32,
    last_frame: u32,
}

impl<D: PcmDevice> Feeder<D> {
    pub fn new(
        device: D,
        audio: Arc<[u8]>,
        payload: Range<usize>,
        descriptor: PcmDescriptor,
        buffer_frames: usize,
        poll_period: Duration,
        status: Arc<SharedStatus>,
    ) -> Self {
        status.set_halted();
        status.publish_frame(0);
        Self {
            device,
            audio,
            payload,
            last_frame: descriptor.last_frame(),
            descriptor,
            buffer_frames,
            poll_period,
            status,
            playing: false,
            current_frame: 0,
        }
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Apply one transport transition.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Jump { target_ms } => self.jump(target_ms),
        }
        tracing::debug!(
            ?command,
            frame = self.current_frame,
            playing = self.playing,
            "transport command applied"
        );
    }

    fn play(&mut self) {
        self.playing = true;
        self.status.set_playing();
    }

    /// Rewind to the audible position, then discard whatever the device still holds.
    fn pause(&mut self) {
        let queued = match self.device.delay() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("device delay query failed: {e}");
                0
            }
        };
        let queued = u32::try_from(queued).unwrap_or(u32::MAX);
        self.set_frame(self.current_frame.saturating_sub(queued));
        self.discard();
        self.playing = false;
        self.status.set_halted();
    }

    fn stop(&mut self) {
        self.discard();
        self.set_frame(0);
        self.playing = false;
        self.status.set_halted();
    }

    fn jump(&mut self, target_ms: u32) {
        self.set_frame(jump_target_frame(&self.descriptor, target_ms).min(self.last_frame));
        self.discard();
    }

    fn discard(&mut self) {
        if let Err(e) = self.device.drop_pending() {
            tracing::warn!("device discard failed: {e}");
        }
        if let Err(e) = self.device.prepare() {
            tracing::warn!("device prepare failed: {e}");
        }
    }

    fn set_frame(&mut self, frame: u32) {
        self.current_frame = frame;
        self.status.publish_frame(frame);
    }

    /// One write attempt under the fill-threshold policy.
    ///
    /// Returns the number of frames handed to the device.
    pub fn write_step(&mut self) -> usize {
        if !self.playing {
            return 0;
        }

        let avail = match self.device.avail() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("device status query failed: {e}");
                return 0;
            }
        };
        if avail <= self.buffer_frames / 2 {
            return 0;
        }

        let remaining = (self.last_frame - self.current_frame) as usize;
        let end_reached = avail >= remaining;
        let frames = avail.min(remaining);

        if frames > 0 {
            let block = usize::from(self.descriptor.block_align);
            let start = self.payload.start + self.current_frame as usize * block;
            let audio = Arc::clone(&self.audio);
            let bytes = &audio[start..start + frames * block];
            self.write_frames(bytes, frames);
        }

        if end_reached {
            tracing::debug!(last_frame = self.last_frame, "end of stream reached");
            self.stop();
        } else {
            self.set_frame(self.current_frame + frames as u32);
        }
        frames
    }

    fn write_frames(&mut self, bytes: &[u8], frames: usize) {
        match self.device.write_interleaved(bytes, frames) {
            Ok(_) => {}
            Err(WriteError::Underrun) => {
                tracing::debug!(frame = self.current_frame, "underrun, re-priming device");
                if let Err(e) = self.device.prepare() {
                    tracing::warn!("device prepare failed: {e}");
                    return;
                }
                if let Err(WriteError::Device(e)) = self.device.write_interleaved(bytes, frames) {
                    tracing::warn!("device write failed after underrun: {e}");
                }
            }
            Err(WriteError::Device(e)) => {
                tracing::warn!("device write failed: {e}");
            }
        }
    }

    /// Feeder thread body. Returns once `halt` is observed or every sender is gone.
    pub(crate) fn run(mut self, requests: Receiver<Request>, halt: Arc<AtomicBool>) {
        tracing::debug!(
            poll_ms = self.poll_period.as_millis() as u64,
            buffer_frames = self.buffer_frames,
            last_frame = self.last_frame,
            "feeder started"
        );

        while !halt.load(Ordering::Acquire) {
            match requests.try_recv() {
                Ok(request) => {
                    self.apply(request.command);
                    if let Some(barrier) = request.sync {
                        barrier.wait();
                    }
                    let _ = request.done.send(());
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }

            thread::sleep(self.poll_period);
            self.write_step();
        }

        self.discard();
        tracing::debug!("feeder stopped");
    }
}

/// Frame targeted by a jump to `target_ms`, before clamping.
///
/// Scales by the byte rate over 1000, the arithmetic the engine has always used. For
/// anything wider than one byte per frame this overshoots the real position.
pub fn jump_target_frame(descriptor: &PcmDescriptor, target_ms: u32) -> u32 {
    let frame = u64::from(target_ms) * u64::from(descriptor.byte_rate) / 1000;
    u32::try_from(frame).unwrap_or(u32::MAX)
}
