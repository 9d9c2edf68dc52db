//! Engine diagnostics.
//!
//! The engine reports conditions through a single last-write-wins slot rather than
//! per-call results: a new condition overwrites an unread one. Callers that care
//! must inspect [`ErrorSlot::get`] right after the call they are interested in.

use std::sync::Mutex;

use thiserror::Error;

use crate::riff::ContainerError;

/// How serious a recorded condition is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Baseline, nothing to report.
    Info,
    /// The operation still counts as applied (or harmlessly refused).
    Warning,
    /// The operation was aborted; the engine must not be used for playback.
    Error,
}

/// Failure reported by an output backend while opening or driving a device.
///
/// `code` is the backend-native error number, kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{stage}: {message} (code {code})")]
pub struct DeviceError {
    pub stage: DeviceStage,
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(stage: DeviceStage, code: i32, message: impl Into<String>) -> Self {
        Self {
            stage,
            code,
            message: message.into(),
        }
    }
}

/// Step of device negotiation (or operation) that produced a [`DeviceError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStage {
    Open,
    Format,
    Channels,
    Rate,
    Start,
}

impl std::fmt::Display for DeviceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStage::Open => "open device",
            DeviceStage::Format => "set sample format",
            DeviceStage::Channels => "set channel count",
            DeviceStage::Rate => "set sample rate",
            DeviceStage::Start => "start stream",
        };
        f.write_str(s)
    }
}

/// Every condition the engine can record.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("No error")]
    None,

    #[error("Audio is already playing")]
    AlreadyPlaying,
    #[error("Audio is already paused")]
    AlreadyPaused,
    #[error("Jumped beyond end of audio")]
    JumpedBeyondEnd,

    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("Unsupported bits per sample: {0}")]
    UnsupportedSampleFormat(u16),
    #[error("{}", .0.message)]
    Device(#[from] DeviceError),
    #[error("Memory allocation failed")]
    AllocationFailed,
}

impl ErrorKind {
    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::None => Severity::Info,
            ErrorKind::AlreadyPlaying | ErrorKind::AlreadyPaused | ErrorKind::JumpedBeyondEnd => {
                Severity::Warning
            }
            ErrorKind::Container(_)
            | ErrorKind::UnsupportedSampleFormat(_)
            | ErrorKind::Device(_)
            | ErrorKind::AllocationFailed => Severity::Error,
        }
    }
}

/// Snapshot of the diagnostics slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Backend error number for device failures, `0` otherwise.
    pub native_code: i32,
}

impl EngineError {
    pub fn none() -> Self {
        Self::from(ErrorKind::None)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl From<ErrorKind> for EngineError {
    fn from(kind: ErrorKind) -> Self {
        let native_code = match &kind {
            ErrorKind::Device(err) => err.code,
            _ => 0,
        };
        Self {
            severity: kind.severity(),
            kind,
            native_code,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}

/// Single-record, last-write-wins diagnostics slot shared by every engine component.
#[derive(Debug)]
pub struct ErrorSlot {
    inner: Mutex<EngineError>,
}

impl Default for ErrorSlot {
    fn default() -> Self {
        Self {
            inner: Mutex::new(EngineError::none()),
        }
    }
}

impl ErrorSlot {
    /// Overwrite whatever is stored.
    pub fn record(&self, kind: impl Into<ErrorKind>) {
        let err = EngineError::from(kind.into());
        match self.inner.lock() {
            Ok(mut slot) => *slot = err,
            Err(poisoned) => *poisoned.into_inner() = err,
        }
    }

    pub fn get(&self) -> EngineError {
        match self.inner.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reset(&self) {
        self.record(ErrorKind::None);
    }
}

/// Returned when the engine handle itself cannot be created.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to spawn feeder thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl InitError {
    /// Slot equivalent, for collaborators that funnel everything through [`EngineError`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::AllocationFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_kind() {
        assert_eq!(ErrorKind::None.severity(), Severity::Info);
        assert_eq!(ErrorKind::AlreadyPlaying.severity(), Severity::Warning);
        assert_eq!(ErrorKind::JumpedBeyondEnd.severity(), Severity::Warning);
        assert_eq!(
            ErrorKind::UnsupportedSampleFormat(12).severity(),
            Severity::Error
        );
        assert_eq!(
            ErrorKind::Container(ContainerError::TooSmall { len: 3 }).severity(),
            Severity::Error
        );
    }

    #[test]
    fn init_failure_maps_to_allocation_kind() {
        let err = InitError::from(std::io::Error::other("no threads left"));
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        assert_eq!(err.kind().severity(), Severity::Error);
    }

    #[test]
    fn device_error_keeps_native_code_and_message() {
        let err = EngineError::from(ErrorKind::Device(DeviceError::new(
            DeviceStage::Rate,
            -22,
            "Invalid argument",
        )));
        assert_eq!(err.native_code, -22);
        assert!(err.is_error());
        assert_eq!(err.to_string(), "Invalid argument");
    }

    #[test]
    fn slot_is_last_write_wins() {
        let slot = ErrorSlot::default();
        assert_eq!(slot.get().kind, ErrorKind::None);

        slot.record(ErrorKind::AlreadyPaused);
        slot.record(ErrorKind::JumpedBeyondEnd);
        let err = slot.get();
        assert_eq!(err.kind, ErrorKind::JumpedBeyondEnd);
        assert!(err.is_warning());

        slot.reset();
        assert_eq!(slot.get(), EngineError::none());
    }

    #[test]
    fn human_readable_strings() {
        assert_eq!(ErrorKind::None.to_string(), "No error");
        assert_eq!(ErrorKind::AlreadyPlaying.to_string(), "Audio is already playing");
        assert_eq!(
            ErrorKind::UnsupportedSampleFormat(12).to_string(),
            "Unsupported bits per sample: 12"
        );
    }
}
