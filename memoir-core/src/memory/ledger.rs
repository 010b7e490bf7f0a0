//! Cross-session character ledger.
//!
//! Records live and die with their conversation; the ledger carries what
//! named characters learned, did, and became across conversation switches.
//! Facts are mined from finished records (relationships file under both
//! participants, world facts under every character present, core memories
//! as events), deduplicated by character + content so a repeated fact is a
//! confirmation rather than a copy. Stale facts age out after a retention
//! window unless reconfirmed.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::MemoryRecord;

/// Days a fact stays eligible for injection without reconfirmation.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Unique identifier for a ledger fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(Uuid);

impl FactId {
    /// Create a new unique fact ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of thing a ledger fact asserts about its character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCategory {
    /// A standing relationship ("Ann trusts Marcus").
    Relationship,
    /// World knowledge the character was present for.
    Knowledge,
    /// A pivotal event the character took part in.
    Event,
}

impl LedgerCategory {
    /// Get the display name for this category.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCategory::Relationship => "relationship",
            LedgerCategory::Knowledge => "knowledge",
            LedgerCategory::Event => "event",
        }
    }
}

fn default_times_confirmed() -> u32 {
    1
}

/// One persistent fact about one character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerFact {
    pub id: FactId,
    pub character: String,
    pub content: String,
    pub category: LedgerCategory,
    /// Conversation the fact was first learned in, when known.
    #[serde(default)]
    pub origin_conversation: Option<String>,
    pub learned_at: DateTime<Utc>,
    pub last_confirmed: DateTime<Utc>,
    #[serde(default = "default_times_confirmed")]
    pub times_confirmed: u32,
}

impl LedgerFact {
    fn new(
        character: &str,
        content: &str,
        category: LedgerCategory,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FactId::new(),
            character: character.to_string(),
            content: content.to_string(),
            category,
            origin_conversation: origin.map(str::to_string),
            learned_at: now,
            last_confirmed: now,
            times_confirmed: 1,
        }
    }

    /// Refresh the fact's retention clock and confirmation count.
    pub fn confirm(&mut self, now: DateTime<Utc>) {
        self.last_confirmed = now;
        self.times_confirmed = self.times_confirmed.saturating_add(1);
    }

    /// Whole days since the fact was last confirmed (never negative).
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_confirmed).num_days().max(0)
    }
}

/// The full fact collection, persisted alongside conversation records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterLedger {
    facts: Vec<LedgerFact>,
}

impl CharacterLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerFact> {
        self.facts.iter()
    }

    /// Record one fact, or confirm an existing one. Deduplication key is
    /// character + content, case-insensitive.
    pub fn record_fact(
        &mut self,
        character: &str,
        content: &str,
        category: LedgerCategory,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> FactId {
        if let Some(existing) = self.facts.iter_mut().find(|f| {
            f.character.eq_ignore_ascii_case(character) && f.content.eq_ignore_ascii_case(content)
        }) {
            existing.confirm(now);
            return existing.id;
        }

        debug!("[memory:ledger] learned {} fact for {character}: {content}", category.name());
        let fact = LedgerFact::new(character, content, category, origin, now);
        let id = fact.id;
        self.facts.push(fact);
        id
    }

    /// Mine a finished record into ledger facts: relationships file under
    /// both participants, world facts under every character present, and a
    /// core memory files as an event for everyone involved. Returns the
    /// number of facts recorded or confirmed.
    pub fn absorb_record(
        &mut self,
        record: &MemoryRecord,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut touched = 0;

        for note in &record.relationships {
            let content = format!("{} {} {}", note.a, note.kind, note.b);
            for character in [&note.a, &note.b] {
                self.record_fact(character, &content, LedgerCategory::Relationship, origin, now);
                touched += 1;
            }
        }

        for fact in &record.world_facts {
            for character in &record.characters {
                self.record_fact(character, &fact.content, LedgerCategory::Knowledge, origin, now);
                touched += 1;
            }
        }

        if record.is_core_memory {
            for character in &record.characters {
                self.record_fact(character, &record.text, LedgerCategory::Event, origin, now);
                touched += 1;
            }
        }

        touched
    }

    /// All facts about one character, case-insensitive.
    pub fn facts_for(&self, character: &str) -> Vec<&LedgerFact> {
        self.facts
            .iter()
            .filter(|f| f.character.eq_ignore_ascii_case(character))
            .collect()
    }

    /// Facts eligible for injection into `current_conversation`: learned in
    /// a different conversation and confirmed within the retention window.
    /// Best-confirmed first.
    pub fn cross_session(
        &self,
        current_conversation: Option<&str>,
        now: DateTime<Utc>,
        retention_days: i64,
    ) -> Vec<&LedgerFact> {
        let mut eligible: Vec<&LedgerFact> = self
            .facts
            .iter()
            .filter(|f| f.origin_conversation.as_deref() != current_conversation)
            .filter(|f| f.age_days(now) <= retention_days)
            .collect();

        eligible.sort_by(|a, b| {
            b.times_confirmed
                .cmp(&a.times_confirmed)
                .then_with(|| b.last_confirmed.cmp(&a.last_confirmed))
                .then_with(|| a.character.cmp(&b.character))
        });
        eligible
    }

    /// Drop facts whose retention window has lapsed. Returns how many were
    /// removed.
    pub fn prune_stale(&mut self, now: DateTime<Utc>, retention_days: i64) -> usize {
        let before = self.facts.len();
        self.facts.retain(|f| f.age_days(now) <= retention_days);
        let removed = before - self.facts.len();
        if removed > 0 {
            debug!("[memory:ledger] pruned {removed} stale facts");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    #[test]
    fn test_record_fact_dedups_case_insensitive() {
        let mut ledger = CharacterLedger::new();
        let now = Utc::now();

        let first = ledger.record_fact("Ann", "Ann trusts Marcus", LedgerCategory::Relationship, Some("c1"), now);
        let second = ledger.record_fact("ann", "ANN TRUSTS MARCUS", LedgerCategory::Relationship, Some("c2"), now);

        assert_eq!(first, second);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.iter().next().map(|f| f.times_confirmed), Some(2));
    }

    #[test]
    fn test_confirm_refreshes_retention_clock() {
        let mut ledger = CharacterLedger::new();
        let learned = days_ago(40);
        ledger.record_fact("Ann", "knows the harbor route", LedgerCategory::Knowledge, None, learned);

        // Unconfirmed, the fact has aged out.
        assert_eq!(ledger.prune_stale(Utc::now(), DEFAULT_RETENTION_DAYS), 1);

        ledger.record_fact("Ann", "knows the harbor route", LedgerCategory::Knowledge, None, learned);
        ledger.record_fact("Ann", "knows the harbor route", LedgerCategory::Knowledge, None, Utc::now());
        assert_eq!(ledger.prune_stale(Utc::now(), DEFAULT_RETENTION_DAYS), 0);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_absorb_record_files_relationships_under_both() {
        use crate::memory::record::RelationshipNote;

        let mut record = MemoryRecord::new("Ann trusts Marcus.", 50, vec!["ab".into()], Utc::now());
        record.relationships = vec![RelationshipNote {
            a: "Ann".into(),
            b: "Marcus".into(),
            kind: "trusts".into(),
        }];

        let mut ledger = CharacterLedger::new();
        ledger.absorb_record(&record, Some("c1"), Utc::now());

        assert_eq!(ledger.facts_for("Ann").len(), 1);
        assert_eq!(ledger.facts_for("Marcus").len(), 1);
        assert_eq!(ledger.facts_for("Ann")[0].content, "Ann trusts Marcus");
    }

    #[test]
    fn test_absorb_record_files_world_facts_per_character() {
        use crate::memory::record::{WorldFact, WorldFactCategory};

        let mut record =
            MemoryRecord::new("The kingdom is at war.", 50, vec!["ab".into()], Utc::now());
        record.characters = vec!["Ann".into(), "Marcus".into()];
        record.world_facts = vec![WorldFact {
            content: "The kingdom is at war".into(),
            category: WorldFactCategory::Location,
        }];

        let mut ledger = CharacterLedger::new();
        ledger.absorb_record(&record, None, Utc::now());

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.facts_for("Marcus")[0].category, LedgerCategory::Knowledge);
    }

    #[test]
    fn test_absorb_core_memory_as_event() {
        let mut record = MemoryRecord::new("Ann confessed.", 50, vec!["ab".into()], Utc::now())
            .with_core_memory(true);
        record.characters = vec!["Ann".into()];

        let mut ledger = CharacterLedger::new();
        ledger.absorb_record(&record, Some("c1"), Utc::now());

        let facts = ledger.facts_for("Ann");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, LedgerCategory::Event);
        assert_eq!(facts[0].content, "Ann confessed.");
    }

    #[test]
    fn test_cross_session_excludes_current_conversation() {
        let mut ledger = CharacterLedger::new();
        let now = Utc::now();
        ledger.record_fact("Ann", "from here", LedgerCategory::Knowledge, Some("current"), now);
        ledger.record_fact("Ann", "from elsewhere", LedgerCategory::Knowledge, Some("other"), now);
        ledger.record_fact("Ann", "unattributed", LedgerCategory::Knowledge, None, now);

        let eligible = ledger.cross_session(Some("current"), now, DEFAULT_RETENTION_DAYS);
        let contents: Vec<&str> = eligible.iter().map(|f| f.content.as_str()).collect();

        assert!(contents.contains(&"from elsewhere"));
        assert!(contents.contains(&"unattributed"));
        assert!(!contents.contains(&"from here"));
    }

    #[test]
    fn test_cross_session_respects_retention_window() {
        let mut ledger = CharacterLedger::new();
        ledger.record_fact("Ann", "stale", LedgerCategory::Knowledge, Some("other"), days_ago(45));
        ledger.record_fact("Ann", "fresh", LedgerCategory::Knowledge, Some("other"), days_ago(5));

        let eligible = ledger.cross_session(Some("current"), Utc::now(), DEFAULT_RETENTION_DAYS);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].content, "fresh");
    }

    #[test]
    fn test_cross_session_orders_by_confirmations() {
        let mut ledger = CharacterLedger::new();
        let now = Utc::now();
        ledger.record_fact("Ann", "once", LedgerCategory::Knowledge, Some("other"), now);
        ledger.record_fact("Ann", "twice", LedgerCategory::Knowledge, Some("other"), now);
        ledger.record_fact("Ann", "twice", LedgerCategory::Knowledge, Some("other"), now);

        let eligible = ledger.cross_session(Some("current"), now, DEFAULT_RETENTION_DAYS);
        assert_eq!(eligible[0].content, "twice");
        assert_eq!(eligible[1].content, "once");
    }
}
