//! # Fabula Core
//!
//! Core library for Fabula, an interactive storyteller.
//! Provides the turn orchestrator, the generative-AI collaborators (chat,
//! speech, illustration), the WAV container encoder, story persistence,
//! configuration, and fundamental types.

pub mod config;
pub mod error;
pub mod illustration;
pub mod language;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod session;
pub mod types;
pub mod voice;

// Re-export commonly used types at the crate root.
pub use config::{ConfigOverrides, FabulaConfig, load_config};
pub use error::{FabulaError, Result};
pub use illustration::{
    FallbackChain, Illustration, IllustrationSource, ImageRef, ImageStrategy, MockImageStrategy,
    PlaceholderSource,
};
pub use language::Language;
pub use orchestrator::{
    IgnoreReason, ResumeOutcome, SaveStatus, StoryEvent, StoryTeller, SubmitOutcome,
};
pub use persistence::StoryStore;
pub use providers::{ChatHandle, ChatProvider, GeminiClient, MockChatProvider};
pub use session::ConversationSession;
pub use types::{ConversationTurn, Speaker, TurnId, TurnPatch};
pub use voice::{AudioAsset, PcmAudio, SpeechProvider, SttProvider, WavFormat, encode_wav};
