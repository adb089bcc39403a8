//! Text-to-speech provider trait and the mock implementation.
//!
//! The Gemini-backed provider lives in `providers::gemini`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::types::{PcmAudio, WavFormat};
use crate::error::VoiceError;
use crate::language::Language;

/// Trait for text-to-speech providers.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Synthesize speech for `text`.
    ///
    /// Returns raw PCM, or `Ok(None)` when the provider answered without an
    /// audio part.
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
    ) -> Result<Option<PcmAudio>, VoiceError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// What a `MockSpeechProvider` answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSpeechBehavior {
    /// A short 440Hz tone.
    Tone,
    /// A response with no audio part.
    Silent,
    /// A synthesis error.
    Fail,
}

/// A mock TTS provider for testing.
pub struct MockSpeechProvider {
    behavior: MockSpeechBehavior,
    call_count: AtomicUsize,
}

impl MockSpeechProvider {
    /// Create a mock that answers with a tone.
    pub fn new() -> Self {
        Self::with_behavior(MockSpeechBehavior::Tone)
    }

    pub fn with_behavior(behavior: MockSpeechBehavior) -> Self {
        Self {
            behavior,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Number of times `synthesize` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// 16-bit little-endian sine tone, 50ms per character (min 100ms).
    pub fn tone(text: &str, format: WavFormat) -> PcmAudio {
        let duration_secs = (text.chars().count() as f32 * 0.05).max(0.1);
        let num_samples = (format.sample_rate_hz as f32 * duration_secs) as usize;
        let bytes = (0..num_samples)
            .flat_map(|i| {
                let t = i as f32 / format.sample_rate_hz as f32;
                let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
                ((sample * i16::MAX as f32) as i16).to_le_bytes()
            })
            .collect();
        PcmAudio::new(bytes, format)
    }
}

impl Default for MockSpeechProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechProvider for MockSpeechProvider {
    async fn synthesize(
        &self,
        text: &str,
        _language: Language,
    ) -> Result<Option<PcmAudio>, VoiceError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        match self.behavior {
            MockSpeechBehavior::Tone => Ok(Some(Self::tone(text, WavFormat::default()))),
            MockSpeechBehavior::Silent => Ok(None),
            MockSpeechBehavior::Fail => Err(VoiceError::SynthesisFailed {
                message: "mock speech failure".into(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_tone_generates_pcm() {
        let mock = MockSpeechProvider::new();
        let pcm = mock
            .synthesize("Hello, world!", Language::En)
            .await
            .unwrap()
            .unwrap();
        assert!(!pcm.bytes.is_empty());
        assert_eq!(pcm.bytes.len() % 2, 0);
        assert_eq!(pcm.format, WavFormat::default());
    }

    #[tokio::test]
    async fn test_mock_call_count() {
        let mock = MockSpeechProvider::with_behavior(MockSpeechBehavior::Silent);
        assert_eq!(mock.call_count(), 0);
        assert!(mock.synthesize("x", Language::Pt).await.unwrap().is_none());
        assert!(mock.synthesize("y", Language::Pt).await.unwrap().is_none());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockSpeechProvider::with_behavior(MockSpeechBehavior::Fail);
        let result = mock.synthesize("x", Language::Es).await;
        assert!(matches!(result, Err(VoiceError::SynthesisFailed { .. })));
        assert_eq!(mock.name(), "mock");
    }
}
