//! Dynamic importance scoring.
//!
//! Every injection cycle recomputes each record's dynamic importance from
//! its immutable base importance plus recency decay, reinforcement history,
//! thematic sub-scores, and relevance to the current conversational window.
//! The base value is what the summary earned at capture time; everything
//! here only modulates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{MemoryRecord, MemoryType};
use crate::transcript::Turn;

/// Records younger than this many days keep the full recency factor.
const FULL_RECENCY_AGE_DAYS: f64 = 1.0;

/// Records at least this old sit at the recency floor.
const FLOOR_RECENCY_AGE_DAYS: f64 = 30.0;

/// Exponential decay rate applied per day of age between the two bounds.
const DECAY_RATE_PER_DAY: f64 = 0.1;

/// Lowest value the recency factor can take.
const RECENCY_FLOOR: f64 = 0.1;

/// Log-scale applied per reinforcement, and the multiplier ceiling.
const REINFORCEMENT_SCALE: f64 = 0.2;
const REINFORCEMENT_CAP: f64 = 5.0;

/// Bounds for the final dynamic score.
const SCORE_MIN: f64 = 1.0;
const SCORE_MAX: f64 = 15.0;

/// Sub-weights inside the context-relevance boost.
const CONTEXT_TOPIC_SHARE: f64 = 0.4;
const CONTEXT_CHARACTER_SHARE: f64 = 0.4;
const CONTEXT_TONE_SHARE: f64 = 0.1;
const CONTEXT_TYPE_SHARE: f64 = 0.1;

/// Flat factor bump when a record's memory type matches the term being
/// scored (an emotional record counts a little harder on the emotional
/// term, and so on).
const TYPE_MATCH_BUMP: f64 = 0.2;

/// Weights applied to each scoring term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    pub recency_weight: f64,
    pub emotional_weight: f64,
    pub plot_weight: f64,
    pub relationship_weight: f64,
    pub context_weight: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            recency_weight: 0.2,
            emotional_weight: 0.25,
            plot_weight: 0.15,
            relationship_weight: 0.10,
            context_weight: 0.3,
        }
    }
}

/// What the scorer knows about the conversation right now. Built from the
/// recent window by [`CurrentContext::from_window`], or supplied directly by
/// the host when it tracks richer state.
#[derive(Debug, Clone, Default)]
pub struct CurrentContext {
    pub topics: Vec<String>,
    pub characters: Vec<String>,
    pub emotional_tone: Option<String>,
    pub memory_type: Option<MemoryType>,
}

/// Common words skipped when deriving topics from raw turns.
pub(crate) const STOP_WORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "what", "when", "where", "will",
    "would", "could", "should", "there", "their", "about", "which", "while",
    "them", "then", "than", "they", "your", "just", "like", "said", "says",
    "into", "over", "only", "very", "some", "more", "been", "were", "does",
];

/// How many derived topics the window context keeps.
const MAX_WINDOW_TOPICS: usize = 8;

impl CurrentContext {
    /// Derive a context from the most recent turns: frequent significant
    /// words become topics, speaker names become characters. Tone and type
    /// stay unset; the host can fill them when it knows better.
    pub fn from_window(window: &[Turn]) -> Self {
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut characters: Vec<String> = Vec::new();

        for turn in window {
            if let Some(speaker) = &turn.speaker {
                if !characters.iter().any(|c| c.eq_ignore_ascii_case(speaker)) {
                    characters.push(speaker.clone());
                }
            }
            for token in turn
                .text
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
            {
                if token.len() < 4 || STOP_WORDS.contains(&token) {
                    continue;
                }
                *counts.entry(token.to_string()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let topics = ranked
            .into_iter()
            .take(MAX_WINDOW_TOPICS)
            .map(|(word, _)| word)
            .collect();

        Self {
            topics,
            characters,
            emotional_tone: None,
            memory_type: None,
        }
    }

    /// True when the context carries nothing to match against.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
            && self.characters.is_empty()
            && self.emotional_tone.is_none()
            && self.memory_type.is_none()
    }
}

/// Kinds of reinforcement events, each worth a different count increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinforcementKind {
    /// A stored character or topic came up again.
    Mention,
    /// The memory itself was referred to directly.
    DirectReference,
    /// A new turn continues the plot thread this memory started.
    PlotContinuation,
    /// An emotional moment echoes this memory.
    EmotionalCallback,
}

impl ReinforcementKind {
    /// How much this event adds to the reinforcement count.
    pub fn amount(&self) -> u32 {
        match self {
            ReinforcementKind::Mention => 1,
            ReinforcementKind::DirectReference => 2,
            ReinforcementKind::PlotContinuation => 3,
            ReinforcementKind::EmotionalCallback => 2,
        }
    }

    /// Get the display name for this reinforcement kind.
    pub fn name(&self) -> &'static str {
        match self {
            ReinforcementKind::Mention => "mention",
            ReinforcementKind::DirectReference => "direct reference",
            ReinforcementKind::PlotContinuation => "plot continuation",
            ReinforcementKind::EmotionalCallback => "emotional callback",
        }
    }
}

/// Recency factor for a record of the given age: 1.0 up to one day,
/// exponential decay after that, floored at 0.1 from thirty days on.
pub fn recency_factor(age_days: f64) -> f64 {
    if age_days <= FULL_RECENCY_AGE_DAYS {
        1.0
    } else if age_days >= FLOOR_RECENCY_AGE_DAYS {
        RECENCY_FLOOR
    } else {
        (-DECAY_RATE_PER_DAY * age_days).exp().max(RECENCY_FLOOR)
    }
}

/// Reinforcement multiplier: identity at a count of one, logarithmic growth
/// after that, capped at 5x.
pub fn reinforcement_factor(count: u32) -> f64 {
    if count <= 1 {
        return 1.0;
    }
    (1.0 + (count as f64).ln() * REINFORCEMENT_SCALE).min(REINFORCEMENT_CAP)
}

/// Compute a record's dynamic importance for the given context and moment.
/// Always lands in [1, 15], including for an empty context.
pub fn score(
    record: &MemoryRecord,
    context: &CurrentContext,
    now: DateTime<Utc>,
    config: &WeightConfig,
) -> f64 {
    let age_days = (now - record.created_at).num_seconds().max(0) as f64 / 86_400.0;

    let base = record.base_importance as f64;
    let recency_term = recency_factor(age_days) * config.recency_weight * 10.0;
    let reinforced = (base + recency_term) * reinforcement_factor(record.reinforcement_count);

    let emotional_term = sub_score_term(
        record.emotional_impact,
        record.memory_type == MemoryType::Emotional,
        config.emotional_weight,
    );
    let plot_term = sub_score_term(
        record.plot_significance,
        record.memory_type == MemoryType::Plot,
        config.plot_weight,
    );
    let relationship_term = sub_score_term(
        record.character_development,
        record.memory_type == MemoryType::Relationship,
        config.relationship_weight,
    );

    let context_term = context_relevance(record, context) * config.context_weight * 10.0;

    (reinforced + emotional_term + plot_term + relationship_term + context_term)
        .clamp(SCORE_MIN, SCORE_MAX)
}

/// Recompute and store the dynamic importance of every record.
pub fn rescore_all<'a, I>(records: I, context: &CurrentContext, now: DateTime<Utc>, config: &WeightConfig)
where
    I: IntoIterator<Item = &'a mut MemoryRecord>,
{
    for record in records {
        record.dynamic_importance = score(record, context, now, config);
    }
}

fn sub_score_term(sub_score: u8, type_matches: bool, weight: f64) -> f64 {
    let mut factor = sub_score as f64 / 10.0;
    if type_matches {
        factor += TYPE_MATCH_BUMP;
    }
    factor.min(1.0) * weight * 10.0
}

/// Overlap between a record and the current context, in [0, 1].
pub fn context_relevance(record: &MemoryRecord, context: &CurrentContext) -> f64 {
    if context.is_empty() {
        return 0.0;
    }

    let topic_overlap = if context.topics.is_empty() {
        0.0
    } else {
        let matched = context
            .topics
            .iter()
            .filter(|current| {
                record
                    .topics
                    .iter()
                    .any(|stored| fuzzy_topic_match(current, stored))
            })
            .count();
        matched as f64 / context.topics.len() as f64
    };

    let character_overlap = if context.characters.is_empty() {
        0.0
    } else {
        let matched = context
            .characters
            .iter()
            .filter(|name| record.mentions_character(name))
            .count();
        matched as f64 / context.characters.len() as f64
    };

    let tone_match = match (&context.emotional_tone, &record.emotional_tone) {
        (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => 1.0,
        _ => 0.0,
    };

    let type_match = if context.memory_type == Some(record.memory_type) {
        1.0
    } else {
        0.0
    };

    CONTEXT_TOPIC_SHARE * topic_overlap
        + CONTEXT_CHARACTER_SHARE * character_overlap
        + CONTEXT_TONE_SHARE * tone_match
        + CONTEXT_TYPE_SHARE * type_match
}

/// Case-insensitive substring match in either direction, so "war" pairs
/// with "the war of roses" and vice versa.
fn fuzzy_topic_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}
