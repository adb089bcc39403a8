//! Speech-to-text provider trait and the mock implementation.
//!
//! Voice input is a WAV recording of the user; the transcript is submitted
//! like a typed line. The Gemini-backed provider lives in `providers::gemini`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::VoiceError;
use crate::language::Language;

/// Trait for speech-to-text providers.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Transcribe a WAV recording spoken in `language`.
    ///
    /// A recording without words yields an empty transcript, not an error.
    async fn transcribe(&self, wav: &[u8], language: Language) -> Result<String, VoiceError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// A mock STT provider for testing.
pub struct MockSttProvider {
    responses: Mutex<VecDeque<String>>,
    call_count: AtomicUsize,
}

impl MockSttProvider {
    /// Create a new mock that returns errors (no responses queued).
    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Create a mock with pre-configured transcripts.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Number of times `transcribe` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockSttProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttProvider for MockSttProvider {
    async fn transcribe(&self, _wav: &[u8], _language: Language) -> Result<String, VoiceError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| VoiceError::TranscriptionFailed {
                message: "no mock responses queued".into(),
            })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
