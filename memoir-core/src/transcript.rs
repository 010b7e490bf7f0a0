//! Conversation transcript types supplied by the host application.
//!
//! The engine never owns the live conversation; the host passes a
//! [`Transcript`] view into each operation that needs source text. Turn
//! hashes computed here are what record invalidation compares against.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Raw message text as the host renders it.
    pub text: String,
    /// Whether the host attributes this turn to the human user.
    pub is_user: bool,
    /// Display name for the speaker, when the host tracks one.
    #[serde(default)]
    pub speaker: Option<String>,
}

impl Turn {
    /// Create a turn attributed to the human user.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: true,
            speaker: None,
        }
    }

    /// Create a turn attributed to a named character.
    pub fn character(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            speaker: Some(speaker.into()),
        }
    }

    /// Create a non-user turn with no speaker attribution.
    pub fn other(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            speaker: None,
        }
    }

    /// True when the text is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Label used when rendering this turn into a prompt.
    pub fn label(&self) -> &str {
        if let Some(speaker) = &self.speaker {
            speaker
        } else if self.is_user {
            "User"
        } else {
            "Character"
        }
    }
}

/// An ordered view of the live conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transcript from existing turns.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// Append a turn, returning its index.
    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when the transcript has no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Get a turn by index.
    pub fn get(&self, index: usize) -> Option<&Turn> {
        self.turns.get(index)
    }

    /// All turns in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Content hash of the turn at `index`, if it exists.
    pub fn hash_of(&self, index: usize) -> Option<String> {
        self.turns.get(index).map(|t| content_hash(&t.text))
    }

    /// The most recent `n` turns (fewer when the transcript is shorter).
    pub fn recent_window(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Render a turn as `Label: text` for prompt assembly.
    pub fn render_turn(&self, index: usize) -> Option<String> {
        self.turns
            .get(index)
            .map(|t| format!("{}: {}", t.label(), t.text))
    }
}

/// Stable content hash for a turn's text: the first 16 hex characters of its
/// SHA-256 digest. Stored alongside records and recomputed on load to detect
/// edited or regenerated source turns.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash("The knight rode north.");
        let b = content_hash("The knight rode north.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_content_hash_changes_with_text() {
        let a = content_hash("The knight rode north.");
        let b = content_hash("The knight rode south.");
        assert_ne!(a, b);
    }

    #[test]
    fn test_turn_labels() {
        assert_eq!(Turn::user("hi").label(), "User");
        assert_eq!(Turn::character("Ann", "hello").label(), "Ann");
        assert_eq!(Turn::other("the wind howls").label(), "Character");
    }

    #[test]
    fn test_recent_window() {
        let mut transcript = Transcript::new();
        for i in 0..5 {
            transcript.push(Turn::user(format!("turn {i}")));
        }

        let window = transcript.recent_window(3);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].text, "turn 2");

        // Window larger than the transcript returns everything.
        assert_eq!(transcript.recent_window(50).len(), 5);
    }

    #[test]
    fn test_hash_of_missing_index() {
        let transcript = Transcript::new();
        assert!(transcript.hash_of(3).is_none());
    }
}
