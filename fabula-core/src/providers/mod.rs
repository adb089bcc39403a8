//! Generative-AI collaborators.
//!
//! The story pipeline talks to three capabilities: a stateful chat model
//! that continues the story, a speech model (`voice::SpeechProvider`) and
//! image models (`illustration::ImageStrategy`). This module defines the
//! chat side, the safety settings every call carries, and the Google
//! Gemini implementation of all three.

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::error::LlmError;
use crate::language::Language;

pub use gemini::{GeminiClient, GeminiFlashImage, GeminiImagen, illustration_chain};

// ---------------------------------------------------------------------------
// Safety settings
// ---------------------------------------------------------------------------

/// Content categories the safety filter scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

/// Probability at or above which content is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockLowAndAbove,
    BlockMediumAndAbove,
    BlockOnlyHigh,
    BlockNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

/// Child-appropriate settings: block low-probability harm and above in
/// every category.
pub fn story_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::BlockLowAndAbove,
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Chat handle
// ---------------------------------------------------------------------------

/// Role of a chat history entry, in the chat model's terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub text: String,
}

impl ChatEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
        }
    }
}

/// Stateful context of one story conversation with the chat model.
///
/// Owned by the session and passed into every `send_message` call, so
/// several stories can run side by side.
#[derive(Debug)]
pub struct ChatHandle {
    id: Uuid,
    language: Language,
    system_instruction: String,
    safety_settings: Vec<SafetySetting>,
    history: AsyncMutex<Vec<ChatEntry>>,
}

impl ChatHandle {
    /// A chat with the language's storyteller persona and the story safety
    /// settings, seeded with `history`.
    pub fn new(language: Language, history: Vec<ChatEntry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            language,
            system_instruction: language.texts().system_instruction.to_string(),
            safety_settings: story_safety_settings(),
            history: AsyncMutex::new(history),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn safety_settings(&self) -> &[SafetySetting] {
        &self.safety_settings
    }

    /// Snapshot of the conversation so far.
    pub async fn history(&self) -> Vec<ChatEntry> {
        self.history.lock().await.clone()
    }

    /// Append a completed exchange. Failed sends leave history untouched.
    pub async fn record_exchange(&self, user_text: &str, model_text: &str) {
        let mut history = self.history.lock().await;
        history.push(ChatEntry::user(user_text));
        history.push(ChatEntry::model(model_text));
    }
}

// ---------------------------------------------------------------------------
// Chat provider
// ---------------------------------------------------------------------------

/// Trait for story-continuation chat models.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a chat context, optionally resuming prior history.
    fn create_chat(&self, language: Language, history: Vec<ChatEntry>) -> ChatHandle {
        ChatHandle::new(language, history)
    }

    /// Send `text` within `chat` and return the model's reply.
    async fn send_message(&self, chat: &ChatHandle, text: &str) -> Result<String, LlmError>;

    /// Model name for logging.
    fn model_name(&self) -> &str;
}

/// A mock chat provider for testing. Replies are queued; once the queue is
/// empty it answers with a fixed line.
pub struct MockChatProvider {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    call_count: AtomicUsize,
}

impl MockChatProvider {
    pub const DEFAULT_REPLY: &'static str =
        "A little fox found a shiny red kite in the meadow. Where do you think it flew?";

    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// A mock whose every call fails.
    pub fn failing() -> Self {
        let provider = Self::new();
        for _ in 0..20 {
            provider.queue_error(LlmError::Connection {
                message: "mock chat failure".into(),
            });
        }
        provider
    }

    /// Queue a reply for the next call.
    pub fn queue_reply(&self, text: impl Into<String>) {
        self.lock().push_back(Ok(text.into()));
    }

    /// Queue an error for the next call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock().push_back(Err(error));
    }

    /// Number of times `send_message` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn send_message(&self, chat: &ChatHandle, text: &str) -> Result<String, LlmError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let next = self.lock().pop_front();
        let reply = next.unwrap_or_else(|| Ok(Self::DEFAULT_REPLY.to_string()))?;
        chat.record_exchange(text, &reply).await;
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_settings_wire_names() {
        let settings = story_safety_settings();
        assert_eq!(settings.len(), 4);
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json[0]["category"], "HARM_CATEGORY_HARASSMENT");
        assert_eq!(json[3]["category"], "HARM_CATEGORY_DANGEROUS_CONTENT");
        for entry in json.as_array().unwrap() {
            assert_eq!(entry["threshold"], "BLOCK_LOW_AND_ABOVE");
        }
    }

    #[tokio::test]
    async fn test_chat_handle_persona_and_history() {
        let chat = ChatHandle::new(Language::En, vec![ChatEntry::user("a dragon")]);
        assert_eq!(chat.language(), Language::En);
        assert!(chat.system_instruction().contains("storyteller"));
        assert_eq!(chat.safety_settings().len(), 4);

        chat.record_exchange("and then?", "It sneezed glitter!").await;
        let history = chat.history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2], ChatEntry::model("It sneezed glitter!"));
    }

    #[tokio::test]
    async fn test_mock_chat_records_only_successes() {
        let mock = MockChatProvider::new();
        mock.queue_reply("first");
        mock.queue_error(LlmError::EmptyResponse);

        let chat = mock.create_chat(Language::Pt, Vec::new());
        assert_eq!(mock.send_message(&chat, "hi").await.unwrap(), "first");
        assert!(mock.send_message(&chat, "again").await.is_err());
        assert_eq!(
            mock.send_message(&chat, "third").await.unwrap(),
            MockChatProvider::DEFAULT_REPLY
        );

        assert_eq!(mock.call_count(), 3);
        assert_eq!(chat.history().await.len(), 4);
    }

    #[test]
    fn test_chat_handles_are_distinct() {
        let a = ChatHandle::new(Language::Pt, Vec::new());
        let b = ChatHandle::new(Language::Pt, Vec::new());
        assert_ne!(a.id(), b.id());
    }
}
