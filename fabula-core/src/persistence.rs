//! Story persistence: atomic file writes and the saved-story file.
//!
//! The story is written wholesale on explicit save, read once at startup to
//! detect a saved story and again on resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::types::ConversationTurn;

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling
/// file, then renames to the target path. Creates parent directories if
/// they don't exist.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Current on-disk format version.
pub const STORY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct SavedStoryRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    turns: &'a [ConversationTurn],
}

#[derive(Debug, Deserialize)]
struct SavedStory {
    version: u32,
    turns: Vec<ConversationTurn>,
}

/// Either the versioned envelope or a bare turn array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredForm {
    Envelope(SavedStory),
    Bare(Vec<ConversationTurn>),
}

/// The saved story at `{data_dir}/{story_key}.json`.
#[derive(Debug, Clone)]
pub struct StoryStore {
    path: PathBuf,
}

impl StoryStore {
    pub fn new(data_dir: impl AsRef<Path>, story_key: &str) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{}.json", story_key)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a saved story exists. Does not parse it.
    pub fn has_saved_story(&self) -> bool {
        self.path.is_file()
    }

    /// Replace the saved story with `turns`.
    pub fn save(&self, turns: &[ConversationTurn]) -> Result<(), StorageError> {
        let envelope = SavedStoryRef {
            version: STORY_FORMAT_VERSION,
            saved_at: Utc::now(),
            turns,
        };
        atomic_write_json(&self.path, &envelope).map_err(|e| StorageError::Write {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        info!(path = %self.path.display(), turns = turns.len(), "Story saved");
        Ok(())
    }

    /// Load the saved story. Returns `Ok(None)` if there is none.
    pub fn load(&self) -> Result<Option<Vec<ConversationTurn>>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| StorageError::Read {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let stored: StoredForm =
            serde_json::from_str(&data).map_err(|e| StorageError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        let turns = match stored {
            StoredForm::Envelope(story) if story.version > STORY_FORMAT_VERSION => {
                return Err(StorageError::UnsupportedVersion {
                    found: story.version,
                    supported: STORY_FORMAT_VERSION,
                });
            }
            StoredForm::Envelope(story) => story.turns,
            StoredForm::Bare(turns) => {
                debug!(path = %self.path.display(), "Loaded pre-envelope story file");
                turns
            }
        };
        Ok(Some(turns))
    }
}
