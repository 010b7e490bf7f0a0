//! Memory record types.
//!
//! One [`MemoryRecord`] exists per summarized unit (a single turn or a
//! paired exchange), keyed in the store by the unit's target index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad classification of what a memory is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MemoryType {
    /// No dominant theme detected.
    #[default]
    General,
    /// Bonds, trust, conflict between characters.
    Relationship,
    /// Facts about places, history, or how the world works.
    Worldbuilding,
    /// Emotionally charged moments.
    Emotional,
    /// Plot beats: goals, discoveries, turning points.
    Plot,
}

impl MemoryType {
    /// Get the display name for this memory type.
    pub fn name(&self) -> &'static str {
        match self {
            MemoryType::General => "general",
            MemoryType::Relationship => "relationship",
            MemoryType::Worldbuilding => "worldbuilding",
            MemoryType::Emotional => "emotional",
            MemoryType::Plot => "plot",
        }
    }
}

/// The five memory tiers used to prioritize injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryTier {
    /// The most recent raw turns, held in full rather than summarized.
    Immediate,
    /// Recent records with no importance floor.
    ShortTerm,
    /// Mid-importance records within a wider age bound.
    MediumTerm,
    /// High-importance records regardless of age.
    LongTerm,
    /// Pivotal records and core memories, never aged out.
    Permanent,
}

impl MemoryTier {
    /// Get the display name for this tier.
    pub fn name(&self) -> &'static str {
        match self {
            MemoryTier::Immediate => "immediate",
            MemoryTier::ShortTerm => "short-term",
            MemoryTier::MediumTerm => "medium-term",
            MemoryTier::LongTerm => "long-term",
            MemoryTier::Permanent => "permanent",
        }
    }
}

/// Category assigned to an extracted world fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WorldFactCategory {
    /// Places and geography.
    Location,
    /// Past events and lore.
    History,
    /// How the world works: customs, magic, law.
    Rule,
    /// Notable objects and artifacts.
    Object,
    /// Anything else.
    #[default]
    General,
}

impl WorldFactCategory {
    /// Get the display name for this category.
    pub fn name(&self) -> &'static str {
        match self {
            WorldFactCategory::Location => "location",
            WorldFactCategory::History => "history",
            WorldFactCategory::Rule => "rule",
            WorldFactCategory::Object => "object",
            WorldFactCategory::General => "general",
        }
    }
}

/// A relationship between two named characters, as mined from summary text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipNote {
    pub a: String,
    pub b: String,
    /// Verb phrase linking the two ("trusts", "became allies", ...).
    pub kind: String,
}

/// A standalone fact about the world, as mined from summary text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldFact {
    pub content: String,
    #[serde(default)]
    pub category: WorldFactCategory,
}

/// Scene framing extracted from a summary's context annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContext {
    #[serde(default)]
    pub time_hint: Option<String>,
    #[serde(default)]
    pub location_hint: Option<String>,
    #[serde(default)]
    pub present_entities: Vec<String>,
}

impl RecordContext {
    /// True when no framing information was extracted.
    pub fn is_empty(&self) -> bool {
        self.time_hint.is_none() && self.location_hint.is_none() && self.present_entities.is_empty()
    }
}

fn default_confidence() -> f64 {
    0.8
}

fn default_reinforcement() -> u32 {
    1
}

/// One summarized unit of conversation with its extracted metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Cleaned summary text (sentinel markers stripped, annotations removed).
    pub text: String,
    /// Character length of the source unit text.
    pub original_length: usize,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// One hash per source turn, compared against live turns on load.
    pub content_hashes: Vec<String>,
    /// Scene framing, when the summary carried a context annotation.
    #[serde(default)]
    pub context: RecordContext,
    /// Marked as a pivotal narrative moment by the sentinel wrapper.
    #[serde(default)]
    pub is_core_memory: bool,
    /// Importance as parsed from the summary (1-10). Immutable once set.
    pub base_importance: u8,
    /// Derived score (1-15), recomputed each injection cycle. Starts equal
    /// to the base importance until the first recompute.
    pub dynamic_importance: f64,
    /// Extraction confidence in [0.3, 0.95].
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub emotional_tone: Option<String>,
    #[serde(default)]
    pub relationships: Vec<RelationshipNote>,
    #[serde(default)]
    pub world_facts: Vec<WorldFact>,
    /// Sub-score (1-10): how much this moment develops a character.
    pub character_development: u8,
    /// Sub-score (1-10): how much this moment advances the plot.
    pub plot_significance: u8,
    /// Sub-score (1-10): how emotionally charged this moment is.
    pub emotional_impact: u8,
    #[serde(default)]
    pub memory_type: MemoryType,
    /// How often this memory has been referenced again (>= 1).
    #[serde(default = "default_reinforcement")]
    pub reinforcement_count: u32,
    /// Tier assigned by the last classification pass.
    #[serde(default)]
    pub tier: Option<MemoryTier>,
    #[serde(default)]
    pub is_paired: bool,
    #[serde(default)]
    pub paired_source_indices: Vec<usize>,
    /// Set when the user replaced the summary text by hand.
    #[serde(default)]
    pub edited: bool,
}

impl MemoryRecord {
    /// Create a record with neutral defaults; the annotation parser fills in
    /// the extracted fields afterwards.
    pub fn new(
        text: impl Into<String>,
        original_length: usize,
        content_hashes: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            text: text.into(),
            original_length,
            created_at,
            content_hashes,
            context: RecordContext::default(),
            is_core_memory: false,
            base_importance: 5,
            dynamic_importance: 5.0,
            confidence: default_confidence(),
            topics: Vec::new(),
            characters: Vec::new(),
            emotional_tone: None,
            relationships: Vec::new(),
            world_facts: Vec::new(),
            character_development: 1,
            plot_significance: 1,
            emotional_impact: 1,
            memory_type: MemoryType::General,
            reinforcement_count: default_reinforcement(),
            tier: None,
            is_paired: false,
            paired_source_indices: Vec::new(),
            edited: false,
        }
    }

    /// Set the base importance, clamped to 1-10, and reset the dynamic score
    /// to match until the next recompute.
    pub fn with_base_importance(mut self, importance: u8) -> Self {
        self.base_importance = importance.clamp(1, 10);
        self.dynamic_importance = self.base_importance as f64;
        self
    }

    /// Mark the record as covering a paired exchange.
    pub fn with_pair(mut self, source_indices: Vec<usize>) -> Self {
        self.is_paired = source_indices.len() > 1;
        self.paired_source_indices = source_indices;
        self
    }

    /// Mark the record as a core memory.
    pub fn with_core_memory(mut self, is_core: bool) -> Self {
        self.is_core_memory = is_core;
        self
    }

    /// The score used when a component wants "the best available" value:
    /// the dynamic score, which equals the base until first recomputed.
    pub fn effective_importance(&self) -> f64 {
        self.dynamic_importance
    }

    /// Apply a reinforcement event. The stored count grows without a hard
    /// ceiling; saturation lives in the weighting formula.
    pub fn reinforce(&mut self, amount: u32) {
        self.reinforcement_count = self.reinforcement_count.saturating_add(amount);
    }

    /// Replace the summary text with a user-provided version.
    pub fn apply_edit(&mut self, new_text: impl Into<String>) {
        self.text = new_text.into();
        self.edited = true;
    }

    /// True when this record mentions the given name (case-insensitive,
    /// exact match against the character list).
    pub fn mentions_character(&self, name: &str) -> bool {
        let name_lower = name.to_lowercase();
        self.characters.iter().any(|c| c.to_lowercase() == name_lower)
    }
}
