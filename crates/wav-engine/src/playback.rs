//! CPAL output backend.
//!
//! Opens a CPAL output stream whose callback drains a [`FrameRing`] and converts raw
//! little-endian PCM frames to the device sample type. The ring plays the part of the
//! hardware buffer, so the feeder sees a blocking device with free-space and latency queries.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device::{
    self, HwParams, OutputBackend, PcmDevice, SampleFormat, WriteError, pick_buffer_size,
    pick_device, pick_output_config,
};
use crate::error::{DeviceError, DeviceStage};
use crate::queue::{FrameRing, PushOutcome};

/// Output backend on the host's default CPAL audio API.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend;

impl OutputBackend for CpalBackend {
    type Device = CpalDevice;

    fn open(&self, name: &str, params: &HwParams) -> Result<CpalDevice, DeviceError> {
        let host = cpal::default_host();
        let device = pick_device(&host, name)?;
        let supported = pick_output_config(&device, params)?;

        let mut stream_config: cpal::StreamConfig = supported.config();
        if let Some(size) = pick_buffer_size(&supported, params.buffer_frames) {
            stream_config.buffer_size = size;
        }

        let ring = Arc::new(FrameRing::new(params.frame_bytes(), params.buffer_frames));
        let stream = build_output_stream(&device, &stream_config, params.format, &ring)?;
        stream.play().map_err(|e| {
            DeviceError::new(DeviceStage::Start, device::play_stream_code(&e), e.to_string())
        })?;

        tracing::info!(
            device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?params.format,
            buffer_frames = params.buffer_frames,
            "output stream opened"
        );

        Ok(CpalDevice {
            ring,
            _stream: stream,
        })
    }
}

/// An open CPAL output stream and its frame ring. Dropping it closes the stream.
pub struct CpalDevice {
    ring: Arc<FrameRing>,
    _stream: cpal::Stream,
}

impl PcmDevice for CpalDevice {
    fn avail(&mut self) -> Result<usize, DeviceError> {
        Ok(self.ring.free_frames())
    }

    fn delay(&mut self) -> Result<usize, DeviceError> {
        Ok(self.ring.queued_frames())
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        self.ring.clear();
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.ring.prepare();
        Ok(())
    }

    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> Result<usize, WriteError> {
        let len = (frames * self.ring.frame_bytes()).min(data.len());
        match self.ring.push_blocking(&data[..len]) {
            PushOutcome::Written(n) => Ok(n),
            PushOutcome::Xrun => Err(WriteError::Underrun),
        }
    }
}

/// Build a CPAL output stream that plays raw frames from `ring` in `format`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: SampleFormat,
    ring: &Arc<FrameRing>,
) -> Result<cpal::Stream, DeviceError> {
    let width = format.width();
    let built = match format {
        SampleFormat::U8 => build_stream(device, config, ring, width, decode_u8),
        SampleFormat::S16Le => build_stream(device, config, ring, width, decode_s16),
        SampleFormat::S24Packed => build_stream(device, config, ring, width, decode_s24_packed),
        SampleFormat::S32Le => build_stream(device, config, ring, width, decode_s32),
        SampleFormat::F64Le => build_stream(device, config, ring, width, decode_f64),
    };
    built.map_err(|e| {
        DeviceError::new(DeviceStage::Start, device::build_stream_code(&e), e.to_string())
    })
}

fn decode_u8(b: &[u8]) -> u8 {
    b[0]
}

fn decode_s16(b: &[u8]) -> i16 {
    i16::from_le_bytes([b[0], b[1]])
}

/// Packed 24-bit little-endian, left-justified into the upper three bytes of an `i32`.
fn decode_s24_packed(b: &[u8]) -> i32 {
    i32::from_le_bytes([0, b[0], b[1], b[2]])
}

fn decode_s32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn decode_f64(b: &[u8]) -> f64 {
    f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Type-specialized stream builder.
///
/// The callback copies as many bytes as the ring holds, decodes one sample per `width` bytes
/// and pads the rest of the buffer with silence.
fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: &Arc<FrameRing>,
    width: usize,
    decode: F,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    F: Fn(&[u8]) -> T + Send + 'static,
{
    let ring_cb = ring.clone();
    let mut scratch: Vec<u8> = Vec::new();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let want = data.len() * width;
            if scratch.len() < want {
                scratch.resize(want, 0);
            }
            let got = ring_cb.pop_into(&mut scratch[..want]) / width;
            for (slot, bytes) in data.iter_mut().zip(scratch.chunks_exact(width)).take(got) {
                *slot = decode(bytes);
            }
            for slot in data.iter_mut().skip(got) {
                *slot = <T as cpal::Sample>::EQUILIBRIUM;
            }
        },
        err_fn,
        None,
    )
}
