//! The story turn pipeline.
//!
//! For each user line: append the user turn, ask the chat model to continue
//! the story, append the narrator turn with both assets pending, then run
//! speech synthesis and the illustration chain concurrently. Each result is
//! patched into the narrator turn by id as soon as it lands.
//!
//! Failure policy per collaborator:
//! - chat failure becomes an error-flagged narrator turn, with no assets;
//! - speech failure is absorbed, the turn simply has no audio;
//! - illustration never fails, the chain ends in a placeholder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::FabulaConfig;
use crate::error::{FabulaError, StorageError, StoryError};
use crate::illustration::FallbackChain;
use crate::language::Language;
use crate::persistence::StoryStore;
use crate::providers::{ChatProvider, GeminiClient, illustration_chain};
use crate::session::{ConversationSession, chat_history};
use crate::types::{ConversationTurn, TurnId, TurnPatch};
use crate::voice::{AudioAsset, SpeechProvider, SttProvider};

/// Progress notifications for a front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum StoryEvent {
    TurnAppended(ConversationTurn),
    TurnUpdated(ConversationTurn),
    BusyChanged(bool),
}

/// Why a submission did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The text was empty after trimming.
    Empty,
    /// Another turn is in flight.
    Busy,
}

/// Result of [`StoryTeller::submit_user_text`] and
/// [`StoryTeller::submit_user_speech`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    /// The story continued; carries the narrator turn id.
    Narrated(TurnId),
    /// The chat model failed; carries the error turn id.
    Failed(TurnId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The saved story was restored.
    Resumed { turns: usize },
    /// Nothing usable was saved; a fresh story was started.
    StartedFresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
}

#[derive(Debug, Default)]
struct SaveState {
    saving: bool,
    saved_at: Option<Instant>,
}

/// Holds the busy flag for the lifetime of one pipeline run.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
    events: Option<&'a mpsc::Sender<StoryEvent>>,
}

impl<'a> BusyGuard<'a> {
    fn try_acquire(
        flag: &'a AtomicBool,
        events: Option<&'a mpsc::Sender<StoryEvent>>,
    ) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        if let Some(tx) = events {
            notify_busy(tx, true);
        }
        Some(Self { flag, events })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        if let Some(tx) = self.events {
            notify_busy(tx, false);
        }
    }
}

/// Deliver a busy transition without blocking the caller. When the channel
/// is full the event is handed to a task that waits for room, so a slow
/// front-end still sees every transition.
fn notify_busy(tx: &mpsc::Sender<StoryEvent>, busy: bool) {
    match tx.try_send(StoryEvent::BusyChanged(busy)) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tx = tx.clone();
                handle.spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
            Err(_) => warn!(busy, "Event channel full outside a runtime, busy change dropped"),
        },
    }
}

/// Runs story turns against one live conversation session.
pub struct StoryTeller {
    chat: Arc<dyn ChatProvider>,
    speech: Arc<dyn SpeechProvider>,
    illustrations: FallbackChain,
    store: StoryStore,
    transcriber: Option<Arc<dyn SttProvider>>,
    language: Language,
    saved_indicator: Duration,
    session: RwLock<Option<ConversationSession>>,
    busy: AtomicBool,
    save_state: Mutex<SaveState>,
    events: Option<mpsc::Sender<StoryEvent>>,
}

impl StoryTeller {
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        speech: Arc<dyn SpeechProvider>,
        illustrations: FallbackChain,
        store: StoryStore,
        language: Language,
    ) -> Self {
        Self {
            chat,
            speech,
            illustrations,
            store,
            transcriber: None,
            language,
            saved_indicator: Duration::from_secs(2),
            session: RwLock::new(None),
            busy: AtomicBool::new(false),
            save_state: Mutex::new(SaveState::default()),
            events: None,
        }
    }

    /// A storyteller backed by Gemini for chat, speech, transcription and
    /// both image strategies, with the configured placeholder as the last
    /// resort.
    pub fn with_gemini(config: &FabulaConfig) -> Result<Self, FabulaError> {
        let client = Arc::new(GeminiClient::new(config)?);
        let chain = illustration_chain(&client, config);
        let store = StoryStore::new(
            config.storage.resolve_data_dir(),
            &config.storage.story_key,
        );
        Ok(
            Self::new(client.clone(), client.clone(), chain, store, config.language)
                .with_transcriber(client)
                .with_saved_indicator(Duration::from_secs(config.storage.saved_indicator_secs)),
        )
    }

    /// Accept spoken input through `stt`.
    pub fn with_transcriber(mut self, stt: Arc<dyn SttProvider>) -> Self {
        self.transcriber = Some(stt);
        self
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<StoryEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// How long `save_status` reports `Saved` after a save.
    pub fn with_saved_indicator(mut self, duration: Duration) -> Self {
        self.saved_indicator = duration;
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Snapshot of the current session's turns.
    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.turns().to_vec())
            .unwrap_or_default()
    }

    /// The narrator turn a front-end should play next.
    pub async fn last_narrator_turn_id(&self) -> Option<TurnId> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.last_narrator_turn_id().cloned())
    }

    pub fn has_saved_story(&self) -> bool {
        self.store.has_saved_story()
    }

    /// Start a new story, replacing any current one.
    ///
    /// Seeds the introductory narrator line without a chat call and
    /// produces its speech and illustration.
    pub async fn start_session(&self) -> Result<TurnId, StoryError> {
        let _guard =
            BusyGuard::try_acquire(&self.busy, self.events.as_ref()).ok_or(StoryError::Busy)?;
        Ok(self.start_fresh().await)
    }

    /// Continue the saved story, or start a fresh one if none can be read.
    pub async fn resume_session(&self) -> Result<ResumeOutcome, StoryError> {
        let _guard =
            BusyGuard::try_acquire(&self.busy, self.events.as_ref()).ok_or(StoryError::Busy)?;

        let turns = match self.store.load() {
            Ok(Some(turns)) if !turns.is_empty() => turns,
            Ok(_) => {
                info!("No saved story, starting a new one");
                self.start_fresh().await;
                return Ok(ResumeOutcome::StartedFresh);
            }
            Err(e) => {
                error!(error = %e, "Failed to load saved story, starting a new one");
                self.start_fresh().await;
                return Ok(ResumeOutcome::StartedFresh);
            }
        };

        let chat = Arc::new(self.chat.create_chat(self.language, chat_history(&turns)));
        let session = ConversationSession::restore(turns, chat);
        let restored = session.turns().to_vec();
        info!(
            session_id = %session.id(),
            turns = restored.len(),
            "Resumed saved story"
        );
        *self.session.write().await = Some(session);

        for turn in &restored {
            self.emit(StoryEvent::TurnAppended(turn.clone())).await;
        }
        Ok(ResumeOutcome::Resumed {
            turns: restored.len(),
        })
    }

    /// Submit one line from the user.
    ///
    /// Empty text and submissions while another turn is in flight are
    /// ignored. Returns `StoryError::NotStarted` if no session exists yet.
    pub async fn submit_user_text(&self, text: &str) -> Result<SubmitOutcome, StoryError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::Ignored(IgnoreReason::Empty));
        }
        let Some(_guard) = BusyGuard::try_acquire(&self.busy, self.events.as_ref()) else {
            debug!("Submission ignored while a turn is in flight");
            return Ok(SubmitOutcome::Ignored(IgnoreReason::Busy));
        };

        let user_turn = ConversationTurn::user(text);
        let (session_id, chat) = {
            let mut guard = self.session.write().await;
            let session = guard.as_mut().ok_or(StoryError::NotStarted)?;
            session.append(user_turn.clone());
            (session.id(), Arc::clone(session.chat()))
        };
        self.emit(StoryEvent::TurnAppended(user_turn)).await;

        let story = match self.chat.send_message(&chat, text).await {
            Ok(story) => story,
            Err(e) => {
                warn!(
                    model = self.chat.model_name(),
                    error = %e,
                    "Story continuation failed"
                );
                let turn = ConversationTurn::narrator_error(self.language.texts().story_error);
                let id = turn.id.clone();
                self.append_turn(session_id, turn).await;
                return Ok(SubmitOutcome::Failed(id));
            }
        };

        let narrator = ConversationTurn::narrator(story.clone());
        let id = narrator.id.clone();
        self.append_turn(session_id, narrator).await;
        self.produce_assets(session_id, &id, &story).await;
        Ok(SubmitOutcome::Narrated(id))
    }

    /// Submit a WAV recording of the user's voice.
    ///
    /// The transcript goes through [`submit_user_text`](Self::submit_user_text).
    /// Recording while a turn is in flight is ignored without transcribing;
    /// a transcription failure adds no turns.
    pub async fn submit_user_speech(&self, wav: &[u8]) -> Result<SubmitOutcome, FabulaError> {
        let stt = self
            .transcriber
            .as_ref()
            .ok_or(StoryError::VoiceInputUnavailable)?;
        if self.is_busy() {
            debug!("Voice input ignored while a turn is in flight");
            return Ok(SubmitOutcome::Ignored(IgnoreReason::Busy));
        }

        let transcript = stt.transcribe(wav, self.language).await.map_err(|e| {
            warn!(provider = stt.name(), error = %e, "Transcription failed");
            e
        })?;
        debug!(chars = transcript.len(), "Voice input transcribed");
        Ok(self.submit_user_text(&transcript).await?)
    }

    /// Save the current story. Returns `Ok(false)` when there is nothing
    /// worth saving (no session, or only the introduction).
    pub async fn save_story(&self) -> Result<bool, StorageError> {
        let turns = self.turns().await;
        if turns.len() <= 1 {
            debug!(turns = turns.len(), "Nothing to save yet");
            return Ok(false);
        }

        self.lock_save_state().saving = true;
        let result = self.store.save(&turns);
        let mut state = self.lock_save_state();
        state.saving = false;
        match result {
            Ok(()) => {
                state.saved_at = Some(Instant::now());
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Failed to save story");
                state.saved_at = None;
                Err(e)
            }
        }
    }

    pub fn save_status(&self) -> SaveStatus {
        let state = self.lock_save_state();
        if state.saving {
            SaveStatus::Saving
        } else if state
            .saved_at
            .is_some_and(|at| at.elapsed() < self.saved_indicator)
        {
            SaveStatus::Saved
        } else {
            SaveStatus::Idle
        }
    }

    // --- internals ---

    /// Replace the session with a fresh one seeded with the introduction.
    /// Caller holds the busy guard.
    async fn start_fresh(&self) -> TurnId {
        let texts = self.language.texts();
        let chat = Arc::new(self.chat.create_chat(self.language, Vec::new()));
        let mut session = ConversationSession::new(chat);
        let intro = ConversationTurn::intro(texts.initial_message);
        let id = intro.id.clone();
        let session_id = session.id();
        session.append(intro.clone());
        info!(%session_id, language = %self.language, "Started new story");

        *self.session.write().await = Some(session);
        self.emit(StoryEvent::TurnAppended(intro)).await;
        self.produce_assets(session_id, &id, texts.initial_message)
            .await;
        id
    }

    /// Run speech and illustration together, patching each into the turn
    /// as it lands.
    async fn produce_assets(&self, session_id: Uuid, turn_id: &TurnId, story: &str) {
        let speech = async {
            let asset = match self.speech.synthesize(story, self.language).await {
                Ok(Some(pcm)) => Some(AudioAsset::from_pcm(&pcm)),
                Ok(None) => {
                    warn!(%turn_id, provider = self.speech.name(), "Speech returned no audio");
                    None
                }
                Err(e) => {
                    warn!(
                        %turn_id,
                        provider = self.speech.name(),
                        error = %e,
                        "Speech synthesis failed"
                    );
                    None
                }
            };
            self.patch_turn(session_id, turn_id, TurnPatch::Audio(asset))
                .await;
        };

        let illustration = async {
            let prompt = self.language.image_prompt(story);
            let illustration = self.illustrations.generate(&prompt).await;
            self.patch_turn(session_id, turn_id, TurnPatch::Illustration(illustration))
                .await;
        };

        tokio::join!(speech, illustration);
    }

    async fn append_turn(&self, session_id: Uuid, turn: ConversationTurn) {
        {
            let mut guard = self.session.write().await;
            match guard.as_mut() {
                Some(session) if session.id() == session_id => session.append(turn.clone()),
                _ => return,
            }
        }
        self.emit(StoryEvent::TurnAppended(turn)).await;
    }

    async fn patch_turn(&self, session_id: Uuid, turn_id: &TurnId, patch: TurnPatch) {
        let updated = {
            let mut guard = self.session.write().await;
            match guard.as_mut() {
                Some(session) if session.id() == session_id => session
                    .apply_patch(turn_id, patch)
                    .then(|| session.get(turn_id).cloned())
                    .flatten(),
                _ => None,
            }
        };
        if let Some(turn) = updated {
            debug!(%turn_id, pending = turn.is_pending(), "Turn updated");
            self.emit(StoryEvent::TurnUpdated(turn)).await;
        }
    }

    async fn emit(&self, event: StoryEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    fn lock_save_state(&self) -> std::sync::MutexGuard<'_, SaveState> {
        self.save_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::illustration::{MockImageStrategy, PlaceholderSource};
    use crate::providers::MockChatProvider;
    use crate::voice::{MockSpeechBehavior, MockSpeechProvider};
    use tempfile::TempDir;

    fn teller(dir: &TempDir) -> StoryTeller {
        StoryTeller::new(
            Arc::new(MockChatProvider::new()),
            Arc::new(MockSpeechProvider::new()),
            FallbackChain::new(
                vec![Arc::new(MockImageStrategy::succeeding("primary"))],
                PlaceholderSource::default(),
            ),
            StoryStore::new(dir.path(), "story"),
            Language::En,
        )
    }

    #[tokio::test]
    async fn test_start_session_seeds_intro_with_assets() {
        let dir = TempDir::new().unwrap();
        let teller = teller(&dir);
        let id = teller.start_session().await.unwrap();
        assert!(id.is_intro());

        let turns = teller.turns().await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, Language::En.texts().initial_message);
        assert!(turns[0].audio.is_some());
        assert!(turns[0].illustration.is_some());
        assert!(!turns[0].is_pending());
        assert!(!teller.is_busy());
    }

    #[tokio::test]
    async fn test_submit_before_start_is_not_started() {
        let dir = TempDir::new().unwrap();
        let teller = teller(&dir);
        assert_eq!(
            teller.submit_user_text("hello").await,
            Err(StoryError::NotStarted)
        );
        assert!(!teller.is_busy());
    }

    #[tokio::test]
    async fn test_speech_failure_is_silent() {
        let dir = TempDir::new().unwrap();
        let teller = StoryTeller::new(
            Arc::new(MockChatProvider::new()),
            Arc::new(MockSpeechProvider::with_behavior(MockSpeechBehavior::Fail)),
            FallbackChain::placeholder_only(PlaceholderSource::default()),
            StoryStore::new(dir.path(), "story"),
            Language::Pt,
        );
        teller.start_session().await.unwrap();
        let outcome = teller.submit_user_text("um gato").await.unwrap();
        let SubmitOutcome::Narrated(id) = outcome else {
            panic!("Expected Narrated, got {:?}", outcome);
        };

        let turns = teller.turns().await;
        let narrator = turns.iter().find(|t| t.id == id).unwrap();
        assert!(!narrator.failed);
        assert!(narrator.audio.is_none());
        assert!(!narrator.audio_pending);
        assert!(narrator.illustration.as_ref().unwrap().is_placeholder());
    }

    #[tokio::test]
    async fn test_save_status_and_threshold() {
        let dir = TempDir::new().unwrap();
        let teller = teller(&dir).with_saved_indicator(Duration::from_secs(60));
        teller.start_session().await.unwrap();

        // Only the introduction: nothing to save.
        assert!(!teller.save_story().await.unwrap());
        assert!(!teller.has_saved_story());
        assert_eq!(teller.save_status(), SaveStatus::Idle);

        teller.submit_user_text("a kite").await.unwrap();
        assert!(teller.save_story().await.unwrap());
        assert!(teller.has_saved_story());
        assert_eq!(teller.save_status(), SaveStatus::Saved);
    }

    #[tokio::test]
    async fn test_saved_indicator_expires() {
        let dir = TempDir::new().unwrap();
        let teller = teller(&dir).with_saved_indicator(Duration::ZERO);
        teller.start_session().await.unwrap();
        teller.submit_user_text("a kite").await.unwrap();
        assert!(teller.save_story().await.unwrap());
        assert_eq!(teller.save_status(), SaveStatus::Idle);
    }

    #[tokio::test]
    async fn test_busy_change_waits_for_room_in_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(StoryEvent::BusyChanged(true)).await.unwrap();

        notify_busy(&tx, false);
        drop(tx);

        assert_eq!(rx.recv().await, Some(StoryEvent::BusyChanged(true)));
        assert_eq!(rx.recv().await, Some(StoryEvent::BusyChanged(false)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_slow_front_end_still_sees_busy_release() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let teller = teller(&dir).with_events(tx);
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                tokio::task::yield_now().await;
                events.push(event);
            }
            events
        });

        teller.start_session().await.unwrap();
        teller.submit_user_text("a kite").await.unwrap();
        drop(teller);

        let events = collector.await.unwrap();
        let released = events
            .iter()
            .filter(|e| **e == StoryEvent::BusyChanged(false))
            .count();
        assert_eq!(released, 2);
    }

    #[tokio::test]
    async fn test_events_follow_the_pipeline() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let teller = teller(&dir).with_events(tx);
        teller.start_session().await.unwrap();
        drop(teller);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.first(), Some(&StoryEvent::BusyChanged(true)));
        assert_eq!(events.last(), Some(&StoryEvent::BusyChanged(false)));
        assert!(matches!(events[1], StoryEvent::TurnAppended(ref t) if t.id.is_intro()));
        let updates = events
            .iter()
            .filter(|e| matches!(e, StoryEvent::TurnUpdated(_)))
            .count();
        assert_eq!(updates, 2);
    }
}
