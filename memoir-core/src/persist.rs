//! Versioned persistence for conversation memory.
//!
//! Each conversation's records are serialized wholesale into one JSON save
//! file; the cross-session ledger gets its own file beside them. Save files
//! carry a version number checked on load, and duplicated metadata so
//! listings can peek without deserializing every record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::memory::ledger::CharacterLedger;
use crate::memory::record::MemoryRecord;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format")]
    InvalidFormat,

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// File name reserved for the cross-session ledger.
const LEDGER_FILE: &str = "ledger.json";

/// One conversation's memory, ready to resume from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedConversation {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created.
    pub saved_at: DateTime<Utc>,

    pub conversation_id: String,

    /// Records keyed by their target index.
    pub records: HashMap<usize, MemoryRecord>,

    /// Metadata duplicated for peek access.
    pub metadata: SaveMetadata,
}

/// Quick-display information about a save file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub conversation_id: String,
    pub record_count: usize,
    pub core_memories: usize,
    pub saved_at: DateTime<Utc>,
}

impl SavedConversation {
    pub fn new(
        conversation_id: impl Into<String>,
        records: HashMap<usize, MemoryRecord>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let metadata = SaveMetadata {
            conversation_id: conversation_id.clone(),
            record_count: records.len(),
            core_memories: records.values().filter(|r| r.is_core_memory).count(),
            saved_at,
        };

        Self {
            version: SAVE_VERSION,
            saved_at,
            conversation_id,
            records,
            metadata,
        }
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// Get a save's metadata without deserializing its records.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;

        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }

        Ok(partial.metadata)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedLedger {
    version: u32,
    saved_at: DateTime<Utc>,
    ledger: CharacterLedger,
}

/// Information about a conversation save file.
#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub path: PathBuf,
    pub metadata: SaveMetadata,
}

/// A directory of save files.
#[derive(Debug, Clone)]
pub struct MemoryArchive {
    dir: PathBuf,
}

impl MemoryArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save path for one conversation. IDs are sanitized to alphanumerics
    /// so arbitrary host identifiers cannot escape the archive directory.
    pub fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        let sanitized = conversation_id
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect::<String>();
        self.dir.join(format!("conv_{sanitized}.json"))
    }

    fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    pub async fn save_conversation(
        &self,
        conversation_id: &str,
        records: &HashMap<usize, MemoryRecord>,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        if conversation_id.trim().is_empty() {
            return Err(PersistError::InvalidFormat);
        }
        fs::create_dir_all(&self.dir).await?;

        let saved = SavedConversation::new(conversation_id, records.clone(), now);
        saved.save_json(self.conversation_path(conversation_id)).await
    }

    /// Load a conversation's save, or `None` when it has never been saved.
    pub async fn load_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<SavedConversation>, PersistError> {
        match SavedConversation::load_json(self.conversation_path(conversation_id)).await {
            Ok(saved) => Ok(Some(saved)),
            Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn save_ledger(
        &self,
        ledger: &CharacterLedger,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        let saved = SavedLedger {
            version: SAVE_VERSION,
            saved_at: now,
            ledger: ledger.clone(),
        };
        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(self.ledger_path(), content).await?;
        Ok(())
    }

    pub async fn load_ledger(&self) -> Result<Option<CharacterLedger>, PersistError> {
        let content = match fs::read_to_string(self.ledger_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let saved: SavedLedger = serde_json::from_str(&content)?;
        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }
        Ok(Some(saved.ledger))
    }

    /// List every conversation save, most recently saved first. Unreadable
    /// files (including the ledger file) are skipped.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationInfo>, PersistError> {
        let mut saves = Vec::new();

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            return Ok(saves);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(metadata) = SavedConversation::peek_metadata(&path).await {
                    saves.push(ConversationInfo { path, metadata });
                }
            }
        }

        saves.sort_by(|a, b| b.metadata.saved_at.cmp(&a.metadata.saved_at));
        Ok(saves)
    }

    /// Drop saves beyond the newest `keep`, never touching the active
    /// conversation. Returns how many files were removed.
    pub async fn prune_conversations(
        &self,
        keep: usize,
        active: Option<&str>,
    ) -> Result<usize, PersistError> {
        let saves = self.list_conversations().await?;

        let mut kept = 0;
        let mut removed = 0;
        for save in &saves {
            if active == Some(save.metadata.conversation_id.as_str()) {
                continue;
            }
            if kept < keep {
                kept += 1;
                continue;
            }
            fs::remove_file(&save.path).await?;
            removed += 1;
        }

        if removed > 0 {
            info!("[memory:persist] pruned {removed} old conversation saves");
        }
        Ok(removed)
    }
}
