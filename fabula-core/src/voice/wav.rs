//! WAV container encoding for raw speech PCM.
//!
//! The speech model returns bare little-endian PCM with no header. Players
//! need a RIFF/WAVE container, so `encode_wav` prepends the canonical
//! 44-byte header and copies the payload through untouched. `hound` is used
//! on the read side to check that the result decodes like any other WAV.

use super::types::WavFormat;
use crate::error::VoiceError;

/// Size of the canonical PCM WAV header.
pub const HEADER_LEN: usize = 44;

/// `WAVE_FORMAT_PCM`.
const PCM_FORMAT_TAG: u16 = 1;
/// Size of the `fmt ` chunk body for plain PCM.
const FMT_CHUNK_LEN: u32 = 16;

/// Header fields read back from an encoded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_len: u32,
    pub format_tag: u16,
    pub format: WavFormat,
    pub byte_rate: u32,
    pub block_align: u16,
    pub data_len: u32,
}

/// What a standard decoder makes of an encoded asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavSummary {
    pub format: WavFormat,
    /// Frames (samples per channel).
    pub frames: u32,
    pub duration_secs: f32,
}

/// Build a WAV file from raw PCM bytes.
///
/// Never fails: empty input yields a bare header describing zero-length
/// data. Sizes beyond `u32::MAX` saturate, which no speech response reaches.
pub fn encode_wav(pcm: &[u8], format: WavFormat) -> Vec<u8> {
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);

    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());

    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&36u32.saturating_add(data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate_hz.to_le_bytes());
    out.extend_from_slice(&format.byte_rate().to_le_bytes());
    out.extend_from_slice(&format.block_align().to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}

/// Read the 44-byte header back out of an encoded asset.
pub fn parse_header(bytes: &[u8]) -> Result<WavHeader, VoiceError> {
    if bytes.len() < HEADER_LEN {
        return Err(VoiceError::InvalidPayload {
            message: format!("{} bytes is shorter than a WAV header", bytes.len()),
        });
    }
    expect_marker(bytes, 0, b"RIFF")?;
    expect_marker(bytes, 8, b"WAVE")?;
    expect_marker(bytes, 12, b"fmt ")?;
    expect_marker(bytes, 36, b"data")?;

    Ok(WavHeader {
        riff_len: read_u32(bytes, 4),
        format_tag: read_u16(bytes, 20),
        format: WavFormat {
            channels: read_u16(bytes, 22),
            sample_rate_hz: read_u32(bytes, 24),
            bits_per_sample: read_u16(bytes, 34),
        },
        byte_rate: read_u32(bytes, 28),
        block_align: read_u16(bytes, 32),
        data_len: read_u32(bytes, 40),
    })
}

/// Decode an asset with `hound` and report its shape.
pub fn inspect(bytes: &[u8]) -> Result<WavSummary, VoiceError> {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).map_err(|e| {
        VoiceError::UnsupportedFormat {
            format: format!("WAV read error: {}", e),
        }
    })?;
    let spec = reader.spec();
    let frames = reader.duration();
    let duration_secs = if spec.sample_rate == 0 {
        0.0
    } else {
        frames as f32 / spec.sample_rate as f32
    };
    Ok(WavSummary {
        format: WavFormat::new(spec.sample_rate, spec.channels, spec.bits_per_sample),
        frames,
        duration_secs,
    })
}

fn expect_marker(bytes: &[u8], offset: usize, marker: &[u8; 4]) -> Result<(), VoiceError> {
    if &bytes[offset..offset + 4] == marker {
        Ok(())
    } else {
        Err(VoiceError::InvalidPayload {
            message: format!(
                "expected '{}' at byte {}",
                String::from_utf8_lossy(marker),
                offset
            ),
        })
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
