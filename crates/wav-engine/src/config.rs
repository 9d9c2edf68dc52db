use std::sync::Arc;

/// Device name that selects the host's default output.
pub const DEFAULT_DEVICE: &str = "default";

/// Engine construction parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Complete WAVE container bytes. Shared, never copied or mutated by the engine.
    pub audio: Arc<[u8]>,
    /// Output device: `"default"` or a case-insensitive substring of a device name.
    pub device_name: String,
    /// Feeder poll period in milliseconds; also sizes the device buffer.
    ///
    /// Commands are applied at most once per period.
    pub poll_period_ms: u32,
}

impl EngineConfig {
    pub fn new(audio: impl Into<Arc<[u8]>>) -> Self {
        Self {
            audio: audio.into(),
            device_name: DEFAULT_DEVICE.to_string(),
            poll_period_ms: 10,
        }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_poll_period_ms(mut self, ms: u32) -> Self {
        self.poll_period_ms = ms;
        self
    }

    /// Poll period actually used; a zero period would spin.
    pub fn effective_poll_period_ms(&self) -> u32 {
        self.poll_period_ms.max(1)
    }
}
