//! Annotation parsing: turning raw model output into record metadata.
//!
//! Summaries come back as free text, optionally prefixed with bracketed
//! annotations (`[Importance: 7/10]`, `[Topics: ...]`) and optionally
//! wrapped in a core-memory sentinel. Everything here is heuristic: absent
//! annotations fall back to defaults, and the regex templates for
//! relationships and world facts are allowed to over- or under-match.
//!
//! The parser sits behind the [`AnnotationParser`] trait so a structured
//! output contract from the provider can replace it later without touching
//! the rest of the pipeline.

use lazy_static::lazy_static;
use regex::Regex;

use super::record::{
    MemoryType, RecordContext, RelationshipNote, WorldFact, WorldFactCategory,
};

/// Importance assigned when a summary carries no importance annotation.
pub const DEFAULT_IMPORTANCE: u8 = 5;

/// Starting confidence before annotation and length adjustments.
const BASE_CONFIDENCE: f64 = 0.8;

/// Confidence bounds after all adjustments.
const CONFIDENCE_MIN: f64 = 0.3;
const CONFIDENCE_MAX: f64 = 0.95;

lazy_static! {
    static ref CORE_MARKER: Regex =
        Regex::new(r"(?i)</?\s*CORE_MEMORY\s*>").expect("core marker pattern compiles");

    // "Ann and Marcus became allies", "Ann and Marcus become close friends"
    static ref REL_BECAME: Regex = Regex::new(
        r"([A-Z][A-Za-z'\-]+) and ([A-Z][A-Za-z'\-]+) (?:became|become|are now) ([a-z]+(?: [a-z]+)?)"
    )
    .expect("relationship pattern compiles");

    // "Ann trusts Marcus", "Marcus betrayed Ann"
    static ref REL_VERB: Regex = Regex::new(
        r"([A-Z][A-Za-z'\-]+) (?:now )?(trusts|distrusts|loves|hates|fears|resents|protects|betrayed|forgave|admires) ([A-Z][A-Za-z'\-]+)"
    )
    .expect("relationship verb pattern compiles");

    // "The kingdom is at war", "The amulet has a hidden inscription"
    static ref WORLD_FACT: Regex = Regex::new(
        r"[Tt]he ([A-Za-z][A-Za-z ]{1,40}?) (is|are|was|were|has|have) ([^.;\n]{3,100})"
    )
    .expect("world fact pattern compiles");
}

// ============================================================================
// Core-memory sentinel
// ============================================================================

/// True iff the raw text contains an opening or closing core-memory
/// sentinel tag, case-insensitive.
pub fn is_core_memory(raw: &str) -> bool {
    CORE_MARKER.is_match(raw)
}

/// Remove core-memory sentinel tags (keeping their content) and trim
/// surrounding whitespace. Text without markers comes back trimmed but
/// otherwise unchanged.
pub fn strip_core_marker(raw: &str) -> String {
    CORE_MARKER.replace_all(raw, "").trim().to_string()
}

// ============================================================================
// Annotation parsing
// ============================================================================

/// Metadata extracted from one summary, plus the cleaned text that remains
/// after recognized annotations are consumed.
#[derive(Debug, Clone)]
pub struct ParsedAnnotations {
    pub cleaned_text: String,
    pub base_importance: u8,
    /// Whether the importance came from an explicit annotation.
    pub explicit_importance: bool,
    pub topics: Vec<String>,
    pub characters: Vec<String>,
    pub emotional_tone: Option<String>,
    pub context: RecordContext,
    pub memory_type: MemoryType,
    pub character_development: u8,
    pub plot_significance: u8,
    pub emotional_impact: u8,
    pub confidence: f64,
    pub relationships: Vec<RelationshipNote>,
    pub world_facts: Vec<WorldFact>,
}

/// Parses summary text into a metadata fragment. Implementations must never
/// fail: missing annotations get defaults.
pub trait AnnotationParser: Send + Sync {
    fn parse(&self, text: &str) -> ParsedAnnotations;
}

/// Default parser: leading bracketed annotations, keyword heuristics for the
/// memory type and sub-scores, regex templates for relationships and world
/// facts.
#[derive(Debug, Clone, Default)]
pub struct BracketAnnotationParser;

impl AnnotationParser for BracketAnnotationParser {
    fn parse(&self, text: &str) -> ParsedAnnotations {
        let mut base_importance = DEFAULT_IMPORTANCE;
        let mut explicit_importance = false;
        let mut topics = Vec::new();
        let mut characters = Vec::new();
        let mut emotional_tone = None;
        let mut context = RecordContext::default();

        // Consume recognized [Key: value] groups from the front of the text.
        let mut rest = text.trim_start();
        while let Some(stripped) = rest.strip_prefix('[') {
            let Some(close) = stripped.find(']') else {
                break;
            };
            let body = &stripped[..close];
            let Some((key, value)) = body.split_once(':') else {
                break;
            };

            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "importance" => {
                    if let Some(parsed) = parse_importance(value) {
                        base_importance = parsed;
                        explicit_importance = true;
                    }
                }
                "topics" => topics = split_list(value),
                "characters" => characters = split_list(value),
                "tone" => {
                    if !value.is_empty() {
                        emotional_tone = Some(value.to_lowercase());
                    }
                }
                "context" => context = parse_context(value),
                // An unrecognized bracket group belongs to the summary body.
                _ => break,
            }

            rest = stripped[close + 1..].trim_start();
        }

        let cleaned_text = rest.trim().to_string();
        let lower = cleaned_text.to_lowercase();

        let relationship_cues = count_cues(&lower, RELATIONSHIP_CUES);
        let worldbuilding_cues = count_cues(&lower, WORLDBUILDING_CUES);
        let emotional_cues = count_cues(&lower, EMOTIONAL_CUES);
        let plot_cues = count_cues(&lower, PLOT_CUES);

        let memory_type = classify_type(
            relationship_cues,
            worldbuilding_cues,
            emotional_cues,
            plot_cues,
        );

        let relationships = mine_relationships(&cleaned_text);
        let world_facts = mine_world_facts(&cleaned_text);

        let tone_bonus = if emotional_tone.is_some() { 2 } else { 0 };
        let emotional_impact =
            (1 + 2 * emotional_cues as u8 + tone_bonus).clamp(1, 10);
        let plot_significance = (1
            + 2 * plot_cues as u8
            + if explicit_importance && base_importance >= 8 { 2 } else { 0 })
        .clamp(1, 10);
        let character_development = (1
            + 2 * relationship_cues as u8
            + relationships.len().min(3) as u8)
            .clamp(1, 10);

        let confidence = score_confidence(
            &cleaned_text,
            explicit_importance,
            !topics.is_empty(),
            !characters.is_empty(),
            emotional_tone.is_some(),
            !context.is_empty(),
        );

        ParsedAnnotations {
            cleaned_text,
            base_importance,
            explicit_importance,
            topics,
            characters,
            emotional_tone,
            context,
            memory_type,
            character_development,
            plot_significance,
            emotional_impact,
            confidence,
            relationships,
            world_facts,
        }
    }
}

/// Parse "7/10", "7 / 10", or a bare "7". Out-of-range values clamp to 1-10;
/// garbage is treated as absent.
fn parse_importance(value: &str) -> Option<u8> {
    let number = value.split('/').next()?.trim();
    number.parse::<u8>().ok().map(|n| n.clamp(1, 10))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Context annotations look like "time: evening; location: the docks;
/// present: Ann, Marcus". Untagged fragments count as present entities.
fn parse_context(value: &str) -> RecordContext {
    let mut context = RecordContext::default();

    for fragment in value.split(';') {
        for piece in fragment.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let lower = piece.to_lowercase();
            if let Some(v) = strip_tag(piece, &lower, "time:") {
                if !v.is_empty() {
                    context.time_hint = Some(v.to_string());
                }
            } else if let Some(v) = strip_tag(piece, &lower, "location:")
                .or_else(|| strip_tag(piece, &lower, "place:"))
            {
                if !v.is_empty() {
                    context.location_hint = Some(v.to_string());
                }
            } else if let Some(v) = strip_tag(piece, &lower, "present:")
                .or_else(|| strip_tag(piece, &lower, "with:"))
            {
                if !v.is_empty() {
                    context.present_entities.push(v.to_string());
                }
            } else {
                context.present_entities.push(piece.to_string());
            }
        }
    }

    context
}

/// `lower` is `piece` lowercased. Tags are ASCII, so a lowercase prefix
/// match means `piece` starts with the same number of bytes.
fn strip_tag<'a>(piece: &'a str, lower: &str, tag: &str) -> Option<&'a str> {
    lower.starts_with(tag).then(|| piece[tag.len()..].trim())
}

// ============================================================================
// Keyword heuristics
// ============================================================================

const RELATIONSHIP_CUES: &[&str] = &[
    "relationship",
    "friend",
    "friends",
    "friendship",
    "trust",
    "trusts",
    "betray",
    "betrayed",
    "ally",
    "allies",
    "love",
    "loves",
    "bond",
    "romance",
    "rival",
];

const WORLDBUILDING_CUES: &[&str] = &[
    "kingdom",
    "city",
    "village",
    "realm",
    "empire",
    "history",
    "ancient",
    "law",
    "custom",
    "magic",
    "prophecy",
    "legend",
];

const EMOTIONAL_CUES: &[&str] = &[
    "felt",
    "feels",
    "cried",
    "tears",
    "angry",
    "furious",
    "joy",
    "grief",
    "fear",
    "afraid",
    "heartbroken",
    "relieved",
    "ashamed",
];

const PLOT_CUES: &[&str] = &[
    "quest",
    "plan",
    "plans",
    "discover",
    "discovered",
    "reveal",
    "revealed",
    "secret",
    "mission",
    "goal",
    "decided",
    "vowed",
];

fn count_cues(lower_text: &str, cues: &[&str]) -> usize {
    cues.iter()
        .filter(|cue| contains_word(lower_text, cue))
        .count()
}

/// Word-boundary containment check. Both arguments are expected lowercase;
/// a match must not be flanked by alphanumeric characters, so "art" does not
/// match inside "heart".
pub(crate) fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after = abs + needle.len();
        let after_ok = after >= haystack.len()
            || !haystack[after..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle.len();
    }
    false
}

fn classify_type(
    relationship: usize,
    worldbuilding: usize,
    emotional: usize,
    plot: usize,
) -> MemoryType {
    let best = relationship.max(worldbuilding).max(emotional).max(plot);
    if best == 0 {
        return MemoryType::General;
    }
    // Tie-break in fixed order so classification is deterministic.
    if relationship == best {
        MemoryType::Relationship
    } else if plot == best {
        MemoryType::Plot
    } else if emotional == best {
        MemoryType::Emotional
    } else {
        MemoryType::Worldbuilding
    }
}

fn score_confidence(
    cleaned_text: &str,
    explicit_importance: bool,
    has_topics: bool,
    has_characters: bool,
    has_tone: bool,
    has_context: bool,
) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    if explicit_importance {
        confidence += 0.1;
    }
    for present in [has_topics, has_characters, has_tone, has_context] {
        if present {
            confidence += 0.05;
        }
    }
    let len = cleaned_text.chars().count();
    if len < 20 {
        confidence -= 0.1;
    } else if len < 50 {
        confidence -= 0.05;
    }
    confidence.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}

// ============================================================================
// Template mining (shared with permanent-tier synthesis)
// ============================================================================

/// Extract character relationships via the shared templates. Deduplicated
/// on (a, b, kind), case-insensitive.
pub fn mine_relationships(text: &str) -> Vec<RelationshipNote> {
    let mut seen = std::collections::HashSet::new();
    let mut notes = Vec::new();

    for caps in REL_BECAME.captures_iter(text) {
        let note = RelationshipNote {
            a: caps[1].to_string(),
            b: caps[2].to_string(),
            kind: format!("became {}", &caps[3]),
        };
        if seen.insert(dedup_key(&note)) {
            notes.push(note);
        }
    }

    for caps in REL_VERB.captures_iter(text) {
        let note = RelationshipNote {
            a: caps[1].to_string(),
            b: caps[3].to_string(),
            kind: caps[2].to_string(),
        };
        if seen.insert(dedup_key(&note)) {
            notes.push(note);
        }
    }

    notes
}

fn dedup_key(note: &RelationshipNote) -> String {
    format!(
        "{}|{}|{}",
        note.a.to_lowercase(),
        note.b.to_lowercase(),
        note.kind.to_lowercase()
    )
}

/// Extract "The X is/has Y" world facts via the shared templates.
pub fn mine_world_facts(text: &str) -> Vec<WorldFact> {
    let mut seen = std::collections::HashSet::new();
    let mut facts = Vec::new();

    for caps in WORLD_FACT.captures_iter(text) {
        let subject = caps[1].trim().to_string();
        let content = format!("The {} {} {}", subject, &caps[2], caps[3].trim());
        if !seen.insert(content.to_lowercase()) {
            continue;
        }
        facts.push(WorldFact {
            category: categorize_fact(&subject.to_lowercase(), &content.to_lowercase()),
            content,
        });
    }

    facts
}

fn categorize_fact(subject: &str, content: &str) -> WorldFactCategory {
    const LOCATION_WORDS: &[&str] = &[
        "city", "kingdom", "village", "forest", "castle", "tavern", "harbor", "mountain", "realm",
    ];
    const RULE_WORDS: &[&str] = &["law", "rule", "custom", "magic", "ritual", "forbidden"];
    const OBJECT_WORDS: &[&str] = &["sword", "amulet", "ring", "artifact", "map", "letter", "key"];
    const HISTORY_WORDS: &[&str] = &["war", "ancient", "founded", "fell", "centuries", "once"];

    if LOCATION_WORDS.iter().any(|w| contains_word(subject, w)) {
        WorldFactCategory::Location
    } else if RULE_WORDS.iter().any(|w| contains_word(content, w)) {
        WorldFactCategory::Rule
    } else if OBJECT_WORDS.iter().any(|w| contains_word(subject, w)) {
        WorldFactCategory::Object
    } else if HISTORY_WORDS.iter().any(|w| contains_word(content, w)) {
        WorldFactCategory::History
    } else {
        WorldFactCategory::General
    }
}
