//! Fundamental types for story conversations.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::illustration::Illustration;
use crate::voice::AudioAsset;

static TURN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identifier of a conversation turn.
///
/// Fresh ids are `"{prefix}-{unix_millis}-{seq}"`, so they sort roughly by
/// creation time and never collide within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    /// Fixed id of the introductory narrator turn.
    pub const INTRO: &'static str = "start-1";

    fn generate(prefix: &str) -> Self {
        let seq = TURN_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}-{}-{}",
            prefix,
            Utc::now().timestamp_millis(),
            seq
        ))
    }

    pub fn intro() -> Self {
        Self(Self::INTRO.to_string())
    }

    pub fn is_intro(&self) -> bool {
        self.0 == Self::INTRO
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TurnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Narrator,
}

/// One entry of the story transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub speaker: Speaker,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioAsset>,
    #[serde(default)]
    pub audio_pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustration: Option<Illustration>,
    #[serde(default)]
    pub illustration_pending: bool,
    #[serde(default)]
    pub failed: bool,
}

impl ConversationTurn {
    /// A user turn. Settled from the start.
    pub fn user(text: impl Into<String>) -> Self {
        Self::settled(TurnId::generate("user"), Speaker::User, text.into())
    }

    /// A narrator turn still waiting for its audio and illustration.
    pub fn narrator(text: impl Into<String>) -> Self {
        Self::pending(TurnId::generate("narrator"), text.into())
    }

    /// The introductory narrator turn, waiting for audio and illustration.
    pub fn intro(text: impl Into<String>) -> Self {
        Self::pending(TurnId::intro(), text.into())
    }

    /// A narrator turn reporting a failed continuation.
    pub fn narrator_error(text: impl Into<String>) -> Self {
        let mut turn = Self::settled(TurnId::generate("narrator"), Speaker::Narrator, text.into());
        turn.failed = true;
        turn
    }

    fn settled(id: TurnId, speaker: Speaker, text: String) -> Self {
        Self {
            id,
            speaker,
            text,
            audio: None,
            audio_pending: false,
            illustration: None,
            illustration_pending: false,
            failed: false,
        }
    }

    fn pending(id: TurnId, text: String) -> Self {
        Self {
            audio_pending: true,
            illustration_pending: true,
            ..Self::settled(id, Speaker::Narrator, text)
        }
    }

    /// Whether any sub-call for this turn is still outstanding.
    pub fn is_pending(&self) -> bool {
        self.audio_pending || self.illustration_pending
    }

    /// Apply a partial update. Returns `true` if the turn changed.
    ///
    /// Audio and illustration patches touch disjoint fields and only land
    /// while their pending flag is set, so applying them in either order,
    /// or twice, gives the same result.
    pub fn apply(&mut self, patch: TurnPatch) -> bool {
        match patch {
            TurnPatch::Audio(asset) => {
                if !self.audio_pending {
                    return false;
                }
                self.audio_pending = false;
                if !self.failed {
                    self.audio = asset;
                }
                true
            }
            TurnPatch::Illustration(illustration) => {
                if !self.illustration_pending {
                    return false;
                }
                self.illustration_pending = false;
                if !self.failed {
                    self.illustration = Some(illustration);
                }
                true
            }
            TurnPatch::Failed { text } => {
                if self.failed {
                    return false;
                }
                self.failed = true;
                self.text = text;
                self.audio = None;
                self.audio_pending = false;
                self.illustration = None;
                self.illustration_pending = false;
                true
            }
        }
    }

    /// Clear pending flags whose sub-calls can no longer land.
    pub fn settle(&mut self) {
        self.audio_pending = false;
        self.illustration_pending = false;
    }
}

/// A partial update to one turn, keyed by turn id in the session store.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnPatch {
    /// Speech resolved, with or without audio.
    Audio(Option<AudioAsset>),
    /// The illustration chain resolved.
    Illustration(Illustration),
    /// Terminal error transition.
    Failed { text: String },
}

/// Serde adapter storing binary payloads as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
