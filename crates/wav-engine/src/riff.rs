//! RIFF/WAVE container parsing.
//!
//! Validates an in-memory WAVE file and locates its PCM payload. Validation is fail-fast:
//! the first inconsistency aborts parsing with its own [`ContainerError`] variant.
//!
//! Layout (little-endian):
//! - `0..12`: `"RIFF"`, total size (`len - 8`), `"WAVE"`
//! - `12..36`: `"fmt "`, chunk size (16), format code, channels, rate, byte rate,
//!   block align, bits per sample
//! - then any number of optional chunks, followed by `"data"`, data size, payload

use std::ops::Range;

use thiserror::Error;

const RIFF_TAG: &[u8; 4] = b"RIFF";
const WAVE_TAG: &[u8; 4] = b"WAVE";
const FMT_TAG: &[u8; 4] = b"fmt ";
const DATA_TAG: &[u8; 4] = b"data";

const RIFF_HEADER_LEN: usize = 12;
const FMT_CHUNK_LEN: usize = 24;
const DATA_HEADER_LEN: usize = 8;
const FMT_BODY_LEN: u32 = 16;
/// Offset of the form tag; the declared RIFF size counts from here.
const FORM_TAG_OFFSET: usize = 8;
const FORMAT_PCM: u16 = 1;

/// Smallest buffer that can hold the RIFF header, the fmt chunk and a data header.
pub const MIN_CONTAINER_LEN: usize = RIFF_HEADER_LEN + FMT_CHUNK_LEN + DATA_HEADER_LEN;

/// Validation failure, one variant per parsing step.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContainerError {
    #[error("RIFF file is too small ({len} bytes)")]
    TooSmall { len: usize },
    #[error("RIFF magic is invalid")]
    BadRiffTag,
    #[error("WAVE magic is invalid")]
    BadWaveTag,
    #[error("RIFF file size is invalid (declared {declared}, expected {expected})")]
    BadRiffSize { declared: u32, expected: u64 },
    #[error("FMT magic is invalid")]
    BadFmtTag,
    #[error("FMT size is invalid ({0})")]
    BadFmtSize(u32),
    #[error("Audio format is not PCM (format code {0})")]
    NotPcm(u16),
    #[error("Byte rate is invalid (declared {declared}, expected {expected})")]
    BadByteRate { declared: u32, expected: u64 },
    #[error("Block align is invalid (declared {declared}, expected {expected})")]
    BadBlockAlign { declared: u16, expected: u64 },
    #[error("Sample rate is zero")]
    ZeroSampleRate,
    #[error("DATA chunk not found")]
    DataChunkNotFound,
    #[error("DATA size is invalid (declared {declared}, expected {expected})")]
    BadDataSize { declared: u32, expected: u64 },
}

/// PCM parameters of a validated container. Immutable once parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmDescriptor {
    pub sample_rate: u32,
    /// Payload bytes per second of playback.
    pub byte_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    /// Bytes per frame.
    pub block_align: u16,
    pub data_size: u32,
    pub duration_ms: u32,
}

impl PcmDescriptor {
    /// Number of whole frames in the payload; the upper bound of the playback position.
    pub fn last_frame(&self) -> u32 {
        if self.block_align == 0 {
            return 0;
        }
        self.data_size / u32::from(self.block_align)
    }

    /// Playback time for a frame position, as reported by the engine.
    ///
    /// Uses the byte rate as the divisor, matching the scaling used by jumps.
    pub fn frames_to_ms(&self, frame: u32) -> u32 {
        if self.byte_rate == 0 {
            return 0;
        }
        let ms = u64::from(frame) * 1000 / u64::from(self.byte_rate);
        u32::try_from(ms).unwrap_or(u32::MAX)
    }
}

impl std::fmt::Display for PcmDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {} bit, {} ms",
            self.sample_rate, self.channels, self.bits_per_sample, self.duration_ms
        )
    }
}

/// Result of a successful parse: the descriptor plus where the payload lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedContainer {
    pub descriptor: PcmDescriptor,
    /// Byte range of the PCM payload inside the parsed buffer.
    pub payload: Range<usize>,
}

/// Validate `bytes` as a RIFF/WAVE container carrying linear PCM.
pub fn parse(bytes: &[u8]) -> Result<ParsedContainer, ContainerError> {
    let len = bytes.len();
    if len < MIN_CONTAINER_LEN {
        return Err(ContainerError::TooSmall { len });
    }

    if &bytes[0..4] != RIFF_TAG {
        return Err(ContainerError::BadRiffTag);
    }
    if &bytes[8..12] != WAVE_TAG {
        return Err(ContainerError::BadWaveTag);
    }
    let declared = read_u32(bytes, 4);
    let expected = (len - FORM_TAG_OFFSET) as u64;
    if u64::from(declared) != expected {
        return Err(ContainerError::BadRiffSize { declared, expected });
    }

    if &bytes[12..16] != FMT_TAG {
        return Err(ContainerError::BadFmtTag);
    }
    let fmt_size = read_u32(bytes, 16);
    if fmt_size != FMT_BODY_LEN {
        return Err(ContainerError::BadFmtSize(fmt_size));
    }

    let format = read_u16(bytes, 20);
    if format != FORMAT_PCM {
        return Err(ContainerError::NotPcm(format));
    }
    let channels = read_u16(bytes, 22);
    let sample_rate = read_u32(bytes, 24);
    let byte_rate = read_u32(bytes, 28);
    let block_align = read_u16(bytes, 32);
    let bits_per_sample = read_u16(bytes, 34);

    let frame_bytes = u64::from(channels) * u64::from(bits_per_sample) / 8;
    let expected = u64::from(sample_rate) * frame_bytes;
    if u64::from(byte_rate) != expected {
        return Err(ContainerError::BadByteRate {
            declared: byte_rate,
            expected,
        });
    }
    if u64::from(block_align) != frame_bytes || frame_bytes == 0 {
        return Err(ContainerError::BadBlockAlign {
            declared: block_align,
            expected: frame_bytes,
        });
    }
    if sample_rate == 0 {
        return Err(ContainerError::ZeroSampleRate);
    }

    let data_at = find_data_chunk(bytes).ok_or(ContainerError::DataChunkNotFound)?;
    let data_size = read_u32(bytes, data_at + 4);
    let payload_start = data_at + DATA_HEADER_LEN;
    let expected = (len - payload_start) as u64;
    if u64::from(data_size) != expected {
        return Err(ContainerError::BadDataSize {
            declared: data_size,
            expected,
        });
    }

    let duration_ms = u64::from(data_size) * 1000 / u64::from(byte_rate);
    let descriptor = PcmDescriptor {
        sample_rate,
        byte_rate,
        bits_per_sample,
        channels,
        block_align,
        data_size,
        duration_ms: u32::try_from(duration_ms).unwrap_or(u32::MAX),
    };

    Ok(ParsedContainer {
        descriptor,
        payload: payload_start..len,
    })
}

/// Byte-wise scan for the data chunk header, starting right after the fmt chunk.
///
/// Only positions with room for a complete 8-byte header are considered.
fn find_data_chunk(bytes: &[u8]) -> Option<usize> {
    let start = RIFF_HEADER_LEN + FMT_CHUNK_LEN;
    let last = bytes.len().checked_sub(DATA_HEADER_LEN)?;
    (start..=last).find(|&at| &bytes[at..at + 4] == DATA_TAG)
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
