//! Conversation session: the ordered turn store and its chat handle.

use std::sync::Arc;
use uuid::Uuid;

use crate::providers::{ChatEntry, ChatHandle, ChatRole};
use crate::types::{ConversationTurn, Speaker, TurnId, TurnPatch};

/// One story conversation.
///
/// Turns are append-only; existing turns change only through
/// [`apply_patch`](Self::apply_patch).
#[derive(Debug)]
pub struct ConversationSession {
    id: Uuid,
    turns: Vec<ConversationTurn>,
    chat: Arc<ChatHandle>,
}

impl ConversationSession {
    /// A fresh session with no turns.
    pub fn new(chat: Arc<ChatHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
            chat,
        }
    }

    /// A session restored from a saved transcript.
    ///
    /// Pending flags in the transcript belong to sub-calls of a previous
    /// run and are settled.
    pub fn restore(turns: Vec<ConversationTurn>, chat: Arc<ChatHandle>) -> Self {
        let turns = turns
            .into_iter()
            .map(|mut turn| {
                turn.settle();
                turn
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            turns,
            chat,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn chat(&self) -> &Arc<ChatHandle> {
        &self.chat
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn get(&self, id: &TurnId) -> Option<&ConversationTurn> {
        self.turns.iter().find(|t| &t.id == id)
    }

    /// Apply `patch` to the turn with `id`. Returns `true` if a turn changed.
    pub fn apply_patch(&mut self, id: &TurnId, patch: TurnPatch) -> bool {
        self.turns
            .iter_mut()
            .find(|t| &t.id == id)
            .is_some_and(|turn| turn.apply(patch))
    }

    /// The most recent narrator turn that is not an error.
    pub fn last_narrator_turn_id(&self) -> Option<&TurnId> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::Narrator && !t.failed)
            .map(|t| &t.id)
    }
}

/// Chat history for resuming a saved transcript.
///
/// Mirrors what the live chat recorded: the bootstrap turn never reached the
/// model, and a failed narrator turn drops together with the user line that
/// prompted it.
pub fn chat_history(turns: &[ConversationTurn]) -> Vec<ChatEntry> {
    let mut history: Vec<ChatEntry> = Vec::with_capacity(turns.len());
    for turn in turns.iter().filter(|t| !t.id.is_intro()) {
        match (turn.speaker, turn.failed) {
            (Speaker::Narrator, true) => {
                if history.last().is_some_and(|e| e.role == ChatRole::User) {
                    history.pop();
                }
            }
            (Speaker::Narrator, false) => history.push(ChatEntry::model(turn.text.clone())),
            (Speaker::User, _) => history.push(ChatEntry::user(turn.text.clone())),
        }
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::illustration::{Illustration, IllustrationSource, ImageRef};
    use crate::language::Language;
    use pretty_assertions::assert_eq;

    fn chat() -> Arc<ChatHandle> {
        Arc::new(ChatHandle::new(Language::Pt, Vec::new()))
    }

    fn placeholder() -> Illustration {
        Illustration {
            image: ImageRef::Remote {
                url: "https://picsum.photos/800/600?random=1".into(),
            },
            source: IllustrationSource::Placeholder,
        }
    }

    #[test]
    fn test_apply_patch_by_id() {
        let mut session = ConversationSession::new(chat());
        session.append(ConversationTurn::user("a cat"));
        let narrator = ConversationTurn::narrator("The cat purred.");
        let id = narrator.id.clone();
        session.append(narrator);

        assert!(session.apply_patch(&id, TurnPatch::Illustration(placeholder())));
        assert!(!session.apply_patch(&id, TurnPatch::Illustration(placeholder())));
        assert!(!session.apply_patch(&TurnId::from("missing"), TurnPatch::Audio(None)));

        let turn = session.get(&id).unwrap();
        assert!(!turn.illustration_pending);
        assert!(turn.audio_pending);
    }

    #[test]
    fn test_restore_settles_pending() {
        let turns = vec![
            ConversationTurn::intro("Hi!"),
            ConversationTurn::user("a dog"),
            ConversationTurn::narrator("Woof."),
        ];
        let session = ConversationSession::restore(turns, chat());
        assert_eq!(session.len(), 3);
        assert!(session.turns().iter().all(|t| !t.is_pending()));
    }

    #[test]
    fn test_chat_history_drops_failed_exchange() {
        let turns = vec![
            ConversationTurn::intro("Hi!"),
            ConversationTurn::user("a dog"),
            ConversationTurn::narrator_error("Oops"),
            ConversationTurn::user("a cat"),
            ConversationTurn::narrator("Meow."),
        ];
        assert_eq!(
            chat_history(&turns),
            vec![ChatEntry::user("a cat"), ChatEntry::model("Meow.")]
        );
    }

    #[tokio::test]
    async fn test_chat_history_matches_live_chat() {
        let live = ChatHandle::new(Language::En, Vec::new());
        live.record_exchange("a cat", "Meow.").await;
        live.record_exchange("a hat", "The cat wore it.").await;

        let turns = vec![
            ConversationTurn::intro("Hi!"),
            ConversationTurn::user("a cat"),
            ConversationTurn::narrator("Meow."),
            ConversationTurn::user("a dog"),
            ConversationTurn::narrator_error("Oops"),
            ConversationTurn::user("a hat"),
            ConversationTurn::narrator("The cat wore it."),
        ];
        assert_eq!(chat_history(&turns), live.history().await);
    }

    #[test]
    fn test_last_narrator_turn_skips_errors() {
        let mut session = ConversationSession::new(chat());
        assert!(session.last_narrator_turn_id().is_none());

        session.append(ConversationTurn::intro("Hi!"));
        session.append(ConversationTurn::user("x"));
        session.append(ConversationTurn::narrator_error("Oops"));
        assert_eq!(
            session.last_narrator_turn_id(),
            Some(&TurnId::intro())
        );
    }
}
