//! The engine handle and its command synchronization protocol.
//!
//! Callers submit transport commands through a single command lock. A submitted command is
//! sent to the feeder thread together with a zero-capacity completion channel, and the
//! caller blocks on that channel until the feeder has applied the command. If the caller also
//! passes a [`Barrier`], the feeder waits on it right after applying the command, so third
//! parties are released in lockstep with the transition.
//!
//! Commands apply in lock-acquisition order, at most one per poll period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::config::EngineConfig;
use crate::device::{self, HwParams, OutputBackend};
use crate::error::{DeviceError, DeviceStage, EngineError, ErrorKind, ErrorSlot, InitError};
use crate::feeder::{Feeder, Request};
use crate::playback::CpalBackend;
use crate::riff::{self, PcmDescriptor};
use crate::status::{Command, SharedStatus, TransportState};

/// Single-stream playback engine.
///
/// Construction never fails on bad input: parse and device errors are recorded in the error
/// slot and leave an engine that refuses every command. Check [`Engine::last_error`] right
/// after construction. Dropping the engine halts and joins the feeder thread, then releases
/// the device.
pub struct Engine {
    descriptor: Option<PcmDescriptor>,
    status: Arc<SharedStatus>,
    errors: ErrorSlot,
    commands: Option<Mutex<Sender<Request>>>,
    halt: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine playing through CPAL.
    pub fn new(config: EngineConfig) -> Result<Self, InitError> {
        Self::with_backend(config, CpalBackend)
    }

    /// Build an engine playing through `backend`.
    ///
    /// Only fails if the feeder thread cannot be spawned.
    pub fn with_backend<B: OutputBackend>(
        config: EngineConfig,
        backend: B,
    ) -> Result<Self, InitError> {
        let mut engine = Self {
            descriptor: None,
            status: Arc::new(SharedStatus::default()),
            errors: ErrorSlot::default(),
            commands: None,
            halt: Arc::new(AtomicBool::new(false)),
            feeder: None,
        };

        let parsed = match riff::parse(&config.audio) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("container rejected: {e}");
                engine.errors.record(e);
                return Ok(engine);
            }
        };
        let descriptor = parsed.descriptor;
        engine.descriptor = Some(descriptor);

        let poll_ms = config.effective_poll_period_ms();
        let params = match HwParams::negotiate(&descriptor, poll_ms) {
            Ok(params) => params,
            Err(kind) => {
                tracing::warn!("device negotiation failed: {kind}");
                engine.errors.record(kind);
                return Ok(engine);
            }
        };

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<Request>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), DeviceError>>(1);
        let device_name = config.device_name.clone();
        let audio = config.audio.clone();
        let status = engine.status.clone();
        let halt = engine.halt.clone();

        let handle = thread::Builder::new()
            .name("wav-feeder".to_string())
            .spawn(move || {
                let device = match backend.open(&device_name, &params) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let feeder = Feeder::new(
                    device,
                    audio,
                    parsed.payload,
                    descriptor,
                    params.buffer_frames,
                    Duration::from_millis(u64::from(poll_ms)),
                    status,
                );
                let _ = ready_tx.send(Ok(()));
                feeder.run(cmd_rx, halt);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    device = %config.device_name,
                    pcm = %descriptor,
                    poll_ms,
                    buffer_frames = params.buffer_frames,
                    "engine initialized"
                );
                engine.commands = Some(Mutex::new(cmd_tx));
                engine.feeder = Some(handle);
            }
            Ok(Err(e)) => {
                tracing::warn!(device = %config.device_name, "device negotiation failed: {e}");
                engine.errors.record(e);
                let _ = handle.join();
            }
            Err(_) => {
                tracing::warn!("feeder thread exited during device setup");
                engine.errors.record(DeviceError::new(
                    DeviceStage::Open,
                    -device::EIO,
                    "feeder thread exited during device setup",
                ));
                let _ = handle.join();
            }
        }
        Ok(engine)
    }

    /// Start or resume playback. Refused with [`ErrorKind::AlreadyPlaying`] while playing.
    pub fn play(&self, sync: Option<Arc<Barrier>>) -> bool {
        self.submit(Command::Play, sync, |status| {
            if status.is_playing() {
                Err(ErrorKind::AlreadyPlaying)
            } else {
                Ok(())
            }
        })
    }

    /// Pause at the audible position. Refused with [`ErrorKind::AlreadyPaused`] unless playing.
    pub fn pause(&self, sync: Option<Arc<Barrier>>) -> bool {
        self.submit(Command::Pause, sync, |status| {
            if status.is_playing() {
                Ok(())
            } else {
                Err(ErrorKind::AlreadyPaused)
            }
        })
    }

    /// Halt playback and rewind to the start. Never refused.
    pub fn stop(&self, sync: Option<Arc<Barrier>>) {
        self.submit(Command::Stop, sync, |_| Ok(()));
    }

    /// Move the playback position. Targets past the end are clamped to the last frame and
    /// record [`ErrorKind::JumpedBeyondEnd`], but the jump is still applied.
    pub fn jump(&self, sync: Option<Arc<Barrier>>, milliseconds: u32) {
        let total = self.total_duration_ms();
        self.submit(Command::Jump { target_ms: milliseconds }, sync, |_| {
            if milliseconds > total {
                self.errors.record(ErrorKind::JumpedBeyondEnd);
            }
            Ok(())
        });
    }

    /// Run the command protocol: lock, check, hand to the feeder, wait for completion.
    fn submit<F>(&self, command: Command, sync: Option<Arc<Barrier>>, precondition: F) -> bool
    where
        F: FnOnce(&SharedStatus) -> Result<(), ErrorKind>,
    {
        let Some(commands) = &self.commands else {
            tracing::warn!(?command, "engine is not usable for playback; command ignored");
            return false;
        };
        let tx = lock_commands(commands);

        if let Err(kind) = precondition(&self.status) {
            tracing::warn!(?command, "command rejected: {kind}");
            self.errors.record(kind);
            return false;
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        let request = Request {
            command,
            sync,
            done: done_tx,
        };
        if tx.send(request).is_err() {
            tracing::warn!(?command, "feeder is gone; command dropped");
            return false;
        }
        done_rx.recv().is_ok()
    }

    pub fn is_playing(&self) -> bool {
        self.status.is_playing()
    }

    /// True when paused or stopped.
    pub fn is_paused(&self) -> bool {
        self.status.is_paused()
    }

    pub fn state(&self) -> TransportState {
        self.status.state()
    }

    /// Current playback position in milliseconds.
    pub fn current_time_ms(&self) -> u32 {
        self.descriptor
            .map(|d| d.frames_to_ms(self.status.current_frame()))
            .unwrap_or(0)
    }

    pub fn total_duration_ms(&self) -> u32 {
        self.descriptor.map(|d| d.duration_ms).unwrap_or(0)
    }

    /// Parsed PCM parameters; `None` if the container was rejected.
    pub fn descriptor(&self) -> Option<PcmDescriptor> {
        self.descriptor
    }

    /// Whether a feeder thread is running and commands will be applied.
    pub fn is_usable(&self) -> bool {
        self.commands.is_some()
    }

    /// Most recent condition recorded by any component. Lossy: later conditions overwrite it.
    pub fn last_error(&self) -> EngineError {
        self.errors.get()
    }

    pub fn reset_error(&self) {
        self.errors.reset();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.halt.store(true, Ordering::Release);
        if let Some(handle) = self.feeder.take() {
            if handle.join().is_err() {
                tracing::warn!("feeder thread panicked");
            }
        }
        self.commands = None;
    }
}

fn lock_commands(commands: &Mutex<Sender<Request>>) -> MutexGuard<'_, Sender<Request>> {
    match commands.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockBackend;
    use crate::error::Severity;
    use crate::riff::{ContainerError, fixtures};
    use std::time::Instant;

    fn cd_second() -> Vec<u8> {
        fixtures::wav(44_100, 2, 16, 176_400)
    }

    fn engine_with(bytes: Vec<u8>, backend: MockBackend) -> Engine {
        let config = EngineConfig::new(bytes).with_poll_period_ms(1);
        Engine::with_backend(config, backend).unwrap()
    }

    /// Engine whose device never has room, so the position only moves on commands.
    fn idle_engine() -> (Engine, MockBackend) {
        let backend = MockBackend::default();
        backend.log.lock().unwrap().avail = Some(0);
        (engine_with(cd_second(), backend.clone()), backend)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn initializes_from_valid_container() {
        let backend = MockBackend::default();
        let engine = engine_with(cd_second(), backend.clone());

        assert_eq!(engine.last_error(), EngineError::none());
        assert!(engine.is_usable());
        assert_eq!(engine.total_duration_ms(), 1000);
        assert_eq!(engine.current_time_ms(), 0);
        assert!(engine.is_paused());
        assert!(!engine.is_playing());
        assert_eq!(engine.state(), TransportState::Stopped);

        let (name, params) = backend.log.lock().unwrap().opened.clone().unwrap();
        assert_eq!(name, "default");
        assert_eq!(params.channels, 2);
        assert_eq!(params.sample_rate, 44_100);
        assert_eq!(params.buffer_frames, 352);
    }

    #[test]
    fn malformed_container_leaves_unusable_engine() {
        let mut bytes = cd_second();
        bytes.truncate(bytes.len() - 4);
        let riff_size = ((bytes.len() - 8) as u32).to_le_bytes();
        bytes[4..8].copy_from_slice(&riff_size);
        let backend = MockBackend::default();
        let engine = engine_with(bytes, backend.clone());

        let err = engine.last_error();
        assert_eq!(
            err.kind,
            ErrorKind::Container(ContainerError::BadDataSize {
                declared: 176_400,
                expected: 176_396
            })
        );
        assert_eq!(err.severity, Severity::Error);
        assert!(engine.descriptor().is_none());
        assert!(!engine.is_usable());
        assert!(backend.log.lock().unwrap().opened.is_none());

        assert!(!engine.play(None));
        engine.stop(None);
        engine.jump(None, 10);
        assert_eq!(engine.last_error(), err);
    }

    #[test]
    fn unsupported_depth_is_reported() {
        let engine = engine_with(fixtures::wav(8_000, 2, 12, 300), MockBackend::default());
        assert_eq!(engine.last_error().kind, ErrorKind::UnsupportedSampleFormat(12));
        assert!(engine.descriptor().is_some());
        assert!(!engine.is_usable());
    }

    #[test]
    fn device_failure_keeps_native_code() {
        let backend = MockBackend {
            fail_open: Some(DeviceError::new(DeviceStage::Rate, -22, "Invalid argument")),
            ..MockBackend::default()
        };
        let engine = engine_with(cd_second(), backend);
        let err = engine.last_error();
        assert!(err.is_error());
        assert_eq!(err.native_code, -22);
        assert_eq!(err.to_string(), "Invalid argument");
        assert!(!engine.is_usable());
        assert!(!engine.pause(None));
    }

    #[test]
    fn play_twice_is_rejected_without_moving() {
        let (engine, _) = idle_engine();
        engine.jump(None, 1);
        assert!(engine.play(None));
        assert!(engine.is_playing());
        assert_eq!(engine.last_error(), EngineError::none());

        let before = engine.status.current_frame();
        assert!(!engine.play(None));
        let err = engine.last_error();
        assert_eq!(err.kind, ErrorKind::AlreadyPlaying);
        assert!(err.is_warning());
        assert_eq!(engine.status.current_frame(), before);
        assert_eq!(before, 176);
    }

    #[test]
    fn pause_requires_playing() {
        let (engine, _) = idle_engine();
        assert!(!engine.pause(None));
        assert_eq!(engine.last_error().kind, ErrorKind::AlreadyPaused);

        engine.reset_error();
        assert!(engine.play(None));
        assert!(engine.pause(None));
        assert!(engine.is_paused());
        assert_eq!(engine.last_error(), EngineError::none());
    }

    #[test]
    fn stop_is_idempotent() {
        let (engine, backend) = idle_engine();
        engine.jump(None, 3);
        for _ in 0..3 {
            engine.stop(None);
            assert_eq!(engine.current_time_ms(), 0);
            assert_eq!(engine.state(), TransportState::Stopped);
        }
        assert_eq!(engine.last_error(), EngineError::none());
        assert_eq!(backend.log.lock().unwrap().drops, 4);
    }

    #[test]
    fn paused_position_does_not_advance() {
        let backend = MockBackend::default();
        let engine = engine_with(cd_second(), backend.clone());
        assert!(engine.play(None));
        assert!(wait_until(|| engine.status.current_frame() > 0));

        assert!(engine.pause(None));
        let paused_at = engine.current_time_ms();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.current_time_ms(), paused_at);
        assert_eq!(engine.state(), TransportState::Paused);
    }

    #[test]
    fn jump_past_end_warns_clamps_and_ends_on_next_play() {
        let backend = MockBackend::default();
        let engine = engine_with(cd_second(), backend.clone());

        engine.jump(None, 5_000);
        assert_eq!(engine.last_error().kind, ErrorKind::JumpedBeyondEnd);
        assert_eq!(engine.status.current_frame(), 44_100);

        assert!(engine.play(None));
        assert!(wait_until(|| !engine.is_playing()));
        assert_eq!(engine.current_time_ms(), 0);
        assert!(engine.is_paused());
        assert!(backend.log.lock().unwrap().writes.is_empty());
    }

    #[test]
    fn jump_within_duration_does_not_warn() {
        let (engine, _) = idle_engine();
        engine.jump(None, 1000);
        assert_eq!(engine.last_error(), EngineError::none());
        assert_eq!(engine.status.current_frame(), 44_100);
    }

    #[test]
    fn external_barrier_releases_after_command_applied() {
        let (engine, _) = idle_engine();
        let engine = Arc::new(engine);
        let barrier = Arc::new(Barrier::new(2));

        let observer = {
            let engine = engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.is_playing()
            })
        };

        assert!(engine.play(Some(barrier)));
        assert!(observer.join().unwrap());
    }

    #[test]
    fn playback_runs_to_completion() {
        let backend = MockBackend::default();
        let engine = engine_with(fixtures::wav(8_000, 1, 16, 1_600), backend.clone());
        assert!(engine.play(None));
        assert!(wait_until(|| !engine.is_playing()));
        assert_eq!(engine.current_time_ms(), 0);

        let log = backend.log.lock().unwrap();
        assert_eq!(log.writes.iter().sum::<usize>(), 800);
    }

    #[test]
    fn concurrent_commands_are_all_applied() {
        let (engine, backend) = idle_engine();
        let engine = Arc::new(engine);

        let workers: Vec<_> = (0..8u32)
            .map(|i| {
                let engine = engine.clone();
                thread::spawn(move || {
                    let mut discards = 0usize;
                    for round in 0..5u32 {
                        match (i + round) % 4 {
                            0 => {
                                let _ = engine.play(None);
                            }
                            1 => {
                                if engine.pause(None) {
                                    discards += 1;
                                }
                            }
                            2 => {
                                engine.stop(None);
                                discards += 1;
                            }
                            _ => {
                                engine.jump(None, i + round);
                                discards += 1;
                            }
                        }
                    }
                    discards
                })
            })
            .collect();
        let expected: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(backend.log.lock().unwrap().drops, expected);

        engine.stop(None);
        assert_eq!(engine.state(), TransportState::Stopped);
    }

    #[test]
    fn final_state_follows_last_applied_command() {
        let (engine, _backend) = idle_engine();
        let engine = Arc::new(engine);
        let applied = Arc::new(Mutex::new(Vec::new()));

        let workers: Vec<_> = (0..6u32)
            .map(|i| {
                let engine = engine.clone();
                let applied = applied.clone();
                thread::spawn(move || {
                    for round in 0..6u32 {
                        let command = match (i * 3 + round) % 4 {
                            0 => Command::Play,
                            1 => Command::Pause,
                            2 => Command::Stop,
                            _ => Command::Jump {
                                target_ms: 100 * (i + round),
                            },
                        };
                        let mut applied = applied.lock().unwrap();
                        let accepted = match command {
                            Command::Play => engine.play(None),
                            Command::Pause => engine.pause(None),
                            Command::Stop => {
                                engine.stop(None);
                                true
                            }
                            Command::Jump { target_ms } => {
                                engine.jump(None, target_ms);
                                true
                            }
                        };
                        if accepted {
                            applied.push(command);
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let applied = applied.lock().unwrap();
        assert!(!applied.is_empty());
        let (mut playing, mut frame) = (false, 0u32);
        for command in applied.iter() {
            match *command {
                Command::Play => playing = true,
                Command::Pause => playing = false,
                Command::Stop => {
                    playing = false;
                    frame = 0;
                }
                Command::Jump { target_ms } => frame = (target_ms * 176_400 / 1000).min(44_100),
            }
        }
        let expected = match (playing, frame) {
            (true, _) => TransportState::Playing,
            (false, 0) => TransportState::Stopped,
            (false, _) => TransportState::Paused,
        };

        assert_eq!(engine.is_playing(), playing);
        assert_eq!(engine.status.current_frame(), frame);
        assert_eq!(engine.state(), expected);
    }

    #[test]
    fn zero_sample_rate_is_rejected_without_panicking() {
        let engine = engine_with(fixtures::wav(0, 2, 16, 16), MockBackend::default());
        assert_eq!(
            engine.last_error().kind,
            ErrorKind::Container(ContainerError::ZeroSampleRate)
        );
        assert!(!engine.is_usable());
        assert_eq!(engine.total_duration_ms(), 0);
    }

    #[test]
    fn drop_releases_device() {
        let (engine, backend) = idle_engine();
        assert!(engine.play(None));
        drop(engine);
        assert_eq!(backend.log.lock().unwrap().drops, 1);
    }
}
