//! Single-stream WAVE playback engine.
//!
//! Parses an in-memory RIFF/WAVE container, binds an output device to its PCM parameters
//! and streams the payload from a dedicated feeder thread. Transport commands (play, pause,
//! stop, jump) are synchronized with the feeder: each call returns only after the feeder
//! has applied it, optionally releasing a caller-supplied barrier at the same moment.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod feeder;
pub mod playback;
pub mod queue;
pub mod riff;
pub mod status;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, InitError, Severity};
pub use status::TransportState;
