//! Output device binding.
//!
//! Translates a [`PcmDescriptor`] into hardware parameters and defines the blocking
//! playback interface the feeder drives ([`PcmDevice`]). The CPAL implementation lives in
//! [`crate::playback`]; this module also holds the CPAL device/config selection helpers.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::DEFAULT_DEVICE;
use crate::error::{DeviceError, DeviceStage, ErrorKind};
use crate::riff::PcmDescriptor;

/// Hardware buffer length in poll periods.
const BUFFER_PERIODS: u64 = 8;

pub(crate) const ENOENT: i32 = 2;
pub(crate) const EIO: i32 = 5;
pub(crate) const ENODEV: i32 = 19;
pub(crate) const EINVAL: i32 = 22;

/// Sample encodings the engine can feed to a device, as stored in WAVE payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// 8-bit unsigned (WAVE stores 8-bit PCM offset by 128).
    U8,
    S16Le,
    /// 24-bit signed, packed into three bytes.
    S24Packed,
    S32Le,
    F64Le,
}

impl SampleFormat {
    /// Map a container bit depth to a device format. There is no fallback.
    pub fn from_bits(bits: u16) -> Result<Self, ErrorKind> {
        match bits {
            8 => Ok(SampleFormat::U8),
            16 => Ok(SampleFormat::S16Le),
            24 => Ok(SampleFormat::S24Packed),
            32 => Ok(SampleFormat::S32Le),
            64 => Ok(SampleFormat::F64Le),
            other => Err(ErrorKind::UnsupportedSampleFormat(other)),
        }
    }

    /// Bytes per sample in the payload.
    pub fn width(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S24Packed => 3,
            SampleFormat::S32Le => 4,
            SampleFormat::F64Le => 8,
        }
    }

    /// CPAL sample type used to carry this format. Packed 24-bit is widened to 32.
    pub fn cpal_format(self) -> cpal::SampleFormat {
        match self {
            SampleFormat::U8 => cpal::SampleFormat::U8,
            SampleFormat::S16Le => cpal::SampleFormat::I16,
            SampleFormat::S24Packed | SampleFormat::S32Le => cpal::SampleFormat::I32,
            SampleFormat::F64Le => cpal::SampleFormat::F64,
        }
    }
}

/// Parameters negotiated with the output device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwParams {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Device buffer size in frames; the feeder only writes once more than half is free.
    pub buffer_frames: usize,
}

impl HwParams {
    /// Derive device parameters for `descriptor` with the given poll period.
    pub fn negotiate(descriptor: &PcmDescriptor, poll_period_ms: u32) -> Result<Self, ErrorKind> {
        let format = SampleFormat::from_bits(descriptor.bits_per_sample)?;
        Ok(Self {
            format,
            channels: descriptor.channels,
            sample_rate: descriptor.sample_rate,
            buffer_frames: buffer_frames_for(descriptor.sample_rate, poll_period_ms),
        })
    }

    pub fn frame_bytes(&self) -> usize {
        self.format.width() * usize::from(self.channels)
    }
}

/// Device buffer that absorbs scheduling jitter across several poll periods.
pub fn buffer_frames_for(sample_rate: u32, poll_period_ms: u32) -> usize {
    let frames = u64::from(sample_rate) * BUFFER_PERIODS * u64::from(poll_period_ms) / 1000;
    usize::try_from(frames).unwrap_or(usize::MAX)
}

/// Why a write did not go through.
#[derive(Debug)]
pub enum WriteError {
    /// The device drained before new data arrived. Recover with [`PcmDevice::prepare`].
    Underrun,
    Device(DeviceError),
}

/// Blocking, interleaved playback handle.
///
/// Only the feeder thread touches a device once it is open.
pub trait PcmDevice {
    /// Frames that can be written without blocking.
    fn avail(&mut self) -> Result<usize, DeviceError>;
    /// Frames written but not yet audible.
    fn delay(&mut self) -> Result<usize, DeviceError>;
    /// Discard everything queued for output.
    fn drop_pending(&mut self) -> Result<(), DeviceError>;
    /// Re-arm the device after a discard or an underrun.
    fn prepare(&mut self) -> Result<(), DeviceError>;
    /// Write `frames` frames of raw payload bytes; blocks while the buffer is full.
    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> Result<usize, WriteError>;
}

/// Opens devices for the engine. Moved onto the feeder thread, which owns the device.
pub trait OutputBackend: Send + 'static {
    type Device: PcmDevice;

    fn open(&self, name: &str, params: &HwParams) -> Result<Self::Device, DeviceError>;
}

/// Pick a CPAL output device by name.
///
/// `"default"` (or an empty name) selects the host default. Anything else picks the first
/// output device whose name contains `name` (case-insensitive).
pub fn pick_device(host: &cpal::Host, name: &str) -> Result<cpal::Device, DeviceError> {
    let name = name.trim();
    if name.is_empty() || name == DEFAULT_DEVICE {
        return host.default_output_device().ok_or_else(|| {
            DeviceError::new(DeviceStage::Open, -ENODEV, "No default output device")
        });
    }

    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::new(DeviceStage::Open, -EIO, e.to_string()))?;
    for d in devices {
        let matched = d
            .description()
            .ok()
            .map(|n| matches_device_name(&n.name(), name))
            .unwrap_or(false);
        if matched {
            return Ok(d);
        }
    }
    Err(DeviceError::new(
        DeviceStage::Open,
        -ENOENT,
        format!("No output device matched: {name}"),
    ))
}

/// Choose an output config carrying `params` exactly in channels and sample type.
///
/// Within each matching range the rate closest to the requested one is used; across ranges
/// the smallest distance wins.
pub fn pick_output_config(
    device: &cpal::Device,
    params: &HwParams,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| DeviceError::new(DeviceStage::Open, supported_configs_code(&e), e.to_string()))?
        .collect();

    let with_channels: Vec<_> = ranges
        .into_iter()
        .filter(|r| r.channels() == params.channels)
        .collect();
    if with_channels.is_empty() {
        return Err(DeviceError::new(
            DeviceStage::Channels,
            -EINVAL,
            format!("Device does not support {} channels", params.channels),
        ));
    }

    let wanted = params.format.cpal_format();
    let mut best: Option<(u32, cpal::SupportedStreamConfig)> = None;
    for range in with_channels.into_iter().filter(|r| r.sample_format() == wanted) {
        let rate = pick_rate_for_range(
            range.min_sample_rate(),
            range.max_sample_rate(),
            params.sample_rate,
        );
        let distance = rate.abs_diff(params.sample_rate);
        if best.as_ref().map(|(d, _)| distance < *d).unwrap_or(true) {
            best = Some((distance, range.with_sample_rate(rate)));
        }
    }

    match best {
        Some((0, cfg)) => Ok(cfg),
        Some((_, cfg)) => {
            tracing::warn!(
                requested_hz = params.sample_rate,
                chosen_hz = cfg.sample_rate(),
                "using nearest supported sample rate"
            );
            Ok(cfg)
        }
        None => Err(DeviceError::new(
            DeviceStage::Format,
            -EINVAL,
            format!("Device does not support sample format {wanted:?}"),
        )),
    }
}

/// Pick a CPAL callback buffer size that fits in the engine's device buffer.
///
/// Returns `None` when the device does not advertise a range.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    buffer_frames: usize,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let quarter = u32::try_from(buffer_frames / 4).unwrap_or(u32::MAX);
            Some(cpal::BufferSize::Fixed(quarter.clamp(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices, for device selection UIs.
pub fn list_output_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        out.push(d.description()?.to_string());
    }
    Ok(out)
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

fn supported_configs_code(err: &cpal::SupportedStreamConfigsError) -> i32 {
    match err {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => -ENODEV,
        cpal::SupportedStreamConfigsError::InvalidArgument => -EINVAL,
        _ => -EIO,
    }
}

pub(crate) fn build_stream_code(err: &cpal::BuildStreamError) -> i32 {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => -ENODEV,
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => -EINVAL,
        _ => -EIO,
    }
}

pub(crate) fn play_stream_code(err: &cpal::PlayStreamError) -> i32 {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => -ENODEV,
        _ => -EIO,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::riff::{self, fixtures};

    #[test]
    fn maps_supported_bit_depths() {
        assert_eq!(SampleFormat::from_bits(8).unwrap(), SampleFormat::U8);
        assert_eq!(SampleFormat::from_bits(16).unwrap(), SampleFormat::S16Le);
        assert_eq!(SampleFormat::from_bits(24).unwrap(), SampleFormat::S24Packed);
        assert_eq!(SampleFormat::from_bits(32).unwrap(), SampleFormat::S32Le);
        assert_eq!(SampleFormat::from_bits(64).unwrap(), SampleFormat::F64Le);
    }

    #[test]
    fn rejects_other_bit_depths() {
        for bits in [0u16, 4, 12, 20, 48] {
            assert_eq!(
                SampleFormat::from_bits(bits).unwrap_err(),
                ErrorKind::UnsupportedSampleFormat(bits)
            );
        }
    }

    #[test]
    fn buffer_spans_eight_poll_periods() {
        assert_eq!(buffer_frames_for(44_100, 10), 3_528);
        assert_eq!(buffer_frames_for(48_000, 50), 19_200);
        assert_eq!(buffer_frames_for(8_000, 1), 64);
    }

    #[test]
    fn negotiate_copies_stream_layout() {
        let bytes = fixtures::wav(48_000, 2, 24, 600);
        let d = riff::parse(&bytes).unwrap().descriptor;
        let params = HwParams::negotiate(&d, 10).unwrap();
        assert_eq!(params.format, SampleFormat::S24Packed);
        assert_eq!(params.channels, 2);
        assert_eq!(params.sample_rate, 48_000);
        assert_eq!(params.buffer_frames, 3_840);
        assert_eq!(params.frame_bytes(), 6);
    }

    #[test]
    fn negotiate_rejects_unsupported_depth() {
        let bytes = fixtures::wav(8_000, 2, 12, 30);
        let d = riff::parse(&bytes).unwrap().descriptor;
        assert_eq!(
            HwParams::negotiate(&d, 10).unwrap_err(),
            ErrorKind::UnsupportedSampleFormat(12)
        );
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 48_000), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_to_nearest_edge() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 22_050), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }
}
