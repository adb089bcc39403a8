//! Error types for the Fabula story core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the chat model, speech, illustration, storage, configuration,
//! and story orchestration domains.

use std::path::PathBuf;

/// Top-level error type for the Fabula core library.
#[derive(Debug, thiserror::Error)]
pub enum FabulaError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Voice error: {0}")]
    Voice(#[from] VoiceError),

    #[error("Illustration error: {0}")]
    Illustration(#[from] IllustrationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Story error: {0}")]
    Story(#[from] StoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the chat (story continuation) model.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Prompt blocked by safety filter: {reason}")]
    Blocked { reason: String },

    #[error("Model returned no text")]
    EmptyResponse,

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from speech synthesis, transcription and audio container handling.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("Speech synthesis failed: {message}")]
    SynthesisFailed { message: String },

    #[error("Audio payload is empty")]
    NoAudio,

    #[error("Transcription failed: {message}")]
    TranscriptionFailed { message: String },

    #[error("Invalid audio payload: {message}")]
    InvalidPayload { message: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },
}

/// Errors from a single illustration strategy.
///
/// These never escape the fallback chain; they are logged and the next
/// strategy is tried.
#[derive(Debug, thiserror::Error)]
pub enum IllustrationError {
    #[error("Strategy '{strategy}' failed: {message}")]
    GenerationFailed { strategy: String, message: String },

    #[error("Strategy '{strategy}' returned no image part")]
    NoImagePart { strategy: String },
}

/// Errors from saving or loading a story transcript.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Saved story at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Saved story format version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the story orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoryError {
    #[error("No story session has been started")]
    NotStarted,

    #[error("A turn is already being narrated")]
    Busy,

    #[error("No transcriber is configured for voice input")]
    VoiceInputUnavailable,
}

/// A type alias for results using the top-level `FabulaError`.
pub type Result<T> = std::result::Result<T, FabulaError>;
