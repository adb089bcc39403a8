//! Core audio data types for the voice module.

use serde::{Deserialize, Serialize};

use super::wav;

/// Linear PCM layout of a raw sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavFormat {
    /// Sample rate in Hz (e.g., 24000).
    pub sample_rate_hz: u32,
    /// Number of interleaved channels (1 = mono).
    pub channels: u16,
    /// Bits per sample (16 for the speech model's output).
    pub bits_per_sample: u16,
}

impl WavFormat {
    pub fn new(sample_rate_hz: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate_hz,
            channels,
            bits_per_sample,
        }
    }

    /// Bytes per interleaved frame. Wraps on overflow, like the 16-bit
    /// header field it fills.
    pub fn block_align(&self) -> u16 {
        self.channels.wrapping_mul(self.bits_per_sample / 8)
    }

    /// Bytes of audio per second. Wraps on overflow, like the 32-bit header
    /// field it fills.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate_hz
            .wrapping_mul(self.channels as u32)
            .wrapping_mul(self.bits_per_sample as u32 / 8)
    }
}

impl Default for WavFormat {
    /// 24 kHz, mono, 16-bit: what the speech model emits.
    fn default() -> Self {
        Self::new(24_000, 1, 16)
    }
}

/// Raw PCM bytes as returned by the speech collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub bytes: Vec<u8>,
    pub format: WavFormat,
}

impl PcmAudio {
    pub fn new(bytes: Vec<u8>, format: WavFormat) -> Self {
        Self { bytes, format }
    }
}

/// A playable WAV asset attached to a narrator turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAsset {
    /// Complete WAV file: 44-byte header followed by the PCM payload.
    #[serde(with = "crate::types::base64_bytes")]
    pub wav: Vec<u8>,
    pub format: WavFormat,
}

impl AudioAsset {
    /// Wrap raw PCM in a WAV container.
    pub fn from_pcm(pcm: &PcmAudio) -> Self {
        Self {
            wav: wav::encode_wav(&pcm.bytes, pcm.format),
            format: pcm.format,
        }
    }

    /// Length of the PCM payload in bytes.
    pub fn data_len(&self) -> usize {
        self.wav.len().saturating_sub(wav::HEADER_LEN)
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        let byte_rate = self.format.byte_rate();
        if byte_rate == 0 {
            return 0.0;
        }
        self.data_len() as f32 / byte_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_is_speech_output() {
        let format = WavFormat::default();
        assert_eq!(format.sample_rate_hz, 24_000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bits_per_sample, 16);
        assert_eq!(format.byte_rate(), 48_000);
        assert_eq!(format.block_align(), 2);
    }

    #[test]
    fn test_asset_duration() {
        // 48000 bytes at 24kHz mono 16-bit = 1 second
        let pcm = PcmAudio::new(vec![0u8; 48_000], WavFormat::default());
        let asset = AudioAsset::from_pcm(&pcm);
        assert_eq!(asset.data_len(), 48_000);
        assert!((asset.duration_secs() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_asset_serde_base64() {
        let pcm = PcmAudio::new(vec![1, 2, 3, 4], WavFormat::default());
        let asset = AudioAsset::from_pcm(&pcm);
        let json = serde_json::to_value(&asset).unwrap();
        assert!(json["wav"].is_string());
        let back: AudioAsset = serde_json::from_value(json).unwrap();
        assert_eq!(back, asset);
    }
}
