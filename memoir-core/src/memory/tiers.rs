//! Five-tier memory classification.
//!
//! Each injection cycle re-partitions every record into exactly one tier.
//! The permanent check runs first and gates on the immutable base
//! importance (or the core-memory flag), so recency decay can never demote
//! a pivotal record; the middle tiers gate on the context-sensitive dynamic
//! score and exist to surface currently relevant material.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::annotate::{mine_relationships, mine_world_facts};
use super::record::{MemoryRecord, MemoryTier};

/// Oldest (in turns) a record may be and still qualify as short-term.
const SHORT_TERM_MAX_AGE: usize = 50;

/// Dynamic-importance floor and age bound for the medium tier.
const MEDIUM_TERM_MIN_IMPORTANCE: f64 = 6.0;
const MEDIUM_TERM_MAX_AGE: usize = 200;

/// Dynamic-importance floor for the long tier.
const LONG_TERM_MIN_IMPORTANCE: f64 = 8.0;

/// Base-importance floor for the permanent tier.
const PERMANENT_MIN_IMPORTANCE: u8 = 9;

/// Unique identifier for a synthesized permanent entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SynthesizedId(Uuid);

impl SynthesizedId {
    /// Create a new unique entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SynthesizedId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a synthesized permanent entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthesizedKind {
    /// A recurring character trait or relationship.
    CharacterTrait,
    /// A recurring world fact.
    WorldFact,
}

impl SynthesizedKind {
    /// Get the display name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            SynthesizedKind::CharacterTrait => "trait",
            SynthesizedKind::WorldFact => "world fact",
        }
    }
}

/// A recurring trait or fact mined out of record text, carried alongside
/// the permanent tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedEntry {
    pub id: SynthesizedId,
    pub kind: SynthesizedKind,
    pub content: String,
    /// Dynamic importance of the strongest record this was mined from.
    pub importance: f64,
}

/// The result of one classification pass. Tier vectors hold record indices
/// sorted by dynamic importance, strongest first.
#[derive(Debug, Clone, Default)]
pub struct TierPartition {
    /// Turn indices of the running window, held raw rather than summarized.
    pub immediate: Vec<usize>,
    pub short_term: Vec<usize>,
    pub medium_term: Vec<usize>,
    pub long_term: Vec<usize>,
    pub permanent: Vec<usize>,
    /// Records matching no tier; invisible to injection.
    pub unfiled: Vec<usize>,
    /// Recurring traits and facts accumulated for the permanent tier.
    pub synthesized: Vec<SynthesizedEntry>,
}

impl TierPartition {
    /// Total records assigned to any visible tier.
    pub fn filed_count(&self) -> usize {
        self.short_term.len() + self.medium_term.len() + self.long_term.len() + self.permanent.len()
    }
}

/// Partition every record into its tier, writing the assignment back onto
/// the record. Age is `total_turns - index - 1`.
pub fn reclassify<'a, I>(records: I, total_turns: usize, running_window: usize) -> TierPartition
where
    I: IntoIterator<Item = (&'a usize, &'a mut MemoryRecord)>,
{
    let mut partition = TierPartition {
        immediate: (total_turns.saturating_sub(running_window)..total_turns).collect(),
        ..Default::default()
    };

    let mut scored: Vec<(usize, f64, Option<MemoryTier>)> = Vec::new();
    let mut synthesis = SynthesisAccumulator::default();

    for (&index, record) in records {
        let age = total_turns.saturating_sub(index + 1);
        let tier = classify_record(record, age);
        record.tier = tier;

        synthesis.absorb(record);
        scored.push((index, record.effective_importance(), tier));
    }

    // Strongest first within each tier; index breaks ties for determinism.
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    for (index, _, tier) in scored {
        match tier {
            Some(MemoryTier::Permanent) => partition.permanent.push(index),
            Some(MemoryTier::LongTerm) => partition.long_term.push(index),
            Some(MemoryTier::MediumTerm) => partition.medium_term.push(index),
            Some(MemoryTier::ShortTerm) => partition.short_term.push(index),
            _ => partition.unfiled.push(index),
        }
    }

    partition.synthesized = synthesis.into_entries();
    partition
}

/// Tier rules, evaluated permanent-first.
fn classify_record(record: &MemoryRecord, age: usize) -> Option<MemoryTier> {
    if record.is_core_memory || record.base_importance >= PERMANENT_MIN_IMPORTANCE {
        return Some(MemoryTier::Permanent);
    }

    let importance = record.effective_importance();
    if importance >= LONG_TERM_MIN_IMPORTANCE {
        return Some(MemoryTier::LongTerm);
    }
    if importance >= MEDIUM_TERM_MIN_IMPORTANCE && age <= MEDIUM_TERM_MAX_AGE {
        return Some(MemoryTier::MediumTerm);
    }
    if age <= SHORT_TERM_MAX_AGE {
        return Some(MemoryTier::ShortTerm);
    }
    None
}

/// Collects recurring traits and facts across records, keeping the
/// highest-importance instance of each deduplication key.
#[derive(Default)]
struct SynthesisAccumulator {
    entries: std::collections::HashMap<String, SynthesizedEntry>,
}

impl SynthesisAccumulator {
    fn absorb(&mut self, record: &MemoryRecord) {
        let importance = record.effective_importance();

        for note in mine_relationships(&record.text) {
            let key = format!(
                "trait|{}|{}|{}",
                note.a.to_lowercase(),
                note.b.to_lowercase(),
                note.kind.to_lowercase()
            );
            let content = format!("{} {} {}", note.a, note.kind, note.b);
            self.keep_strongest(key, SynthesizedKind::CharacterTrait, content, importance);
        }

        for fact in mine_world_facts(&record.text) {
            let key = format!("fact|{}", fact.content.to_lowercase());
            self.keep_strongest(key, SynthesizedKind::WorldFact, fact.content, importance);
        }
    }

    fn keep_strongest(
        &mut self,
        key: String,
        kind: SynthesizedKind,
        content: String,
        importance: f64,
    ) {
        match self.entries.get_mut(&key) {
            Some(existing) if existing.importance >= importance => {}
            Some(existing) => existing.importance = importance,
            None => {
                self.entries.insert(
                    key,
                    SynthesizedEntry {
                        id: SynthesizedId::new(),
                        kind,
                        content,
                        importance,
                    },
                );
            }
        }
    }

    fn into_entries(self) -> Vec<SynthesizedEntry> {
        let mut entries: Vec<SynthesizedEntry> = self.entries.into_values().collect();
        entries.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.content.cmp(&b.content))
        });
        entries
    }
}
