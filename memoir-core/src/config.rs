//! Engine configuration.
//!
//! One value, handed to [`crate::engine::MemoryEngine`] at construction,
//! covering the host-visible toggles plus the tuning knobs the scoring and
//! composition paths read. Defaults are the values the rest of this crate
//! is calibrated against; builder methods override individual knobs.

use crate::memory::ledger::DEFAULT_RETENTION_DAYS;
use crate::memory::pairing::PairingPolicy;
use crate::memory::weight::WeightConfig;

/// Default count of recent turns held raw instead of summarized.
pub const DEFAULT_RUNNING_WINDOW: usize = 10;

/// Default count of conversations kept by retention pruning.
pub const DEFAULT_RETAINED_CONVERSATIONS: usize = 50;

/// Default number of semantic hits appended to a composed injection.
pub const DEFAULT_SEMANTIC_TOP_K: usize = 3;

/// Prompt-level toggles applied when building summarization requests.
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub include_time_location: bool,
    pub include_present_entities: bool,
    pub include_dialogue: bool,
    /// Soft cap passed to the model as an instruction, not enforced.
    pub max_summary_length: Option<usize>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            include_time_location: true,
            include_present_entities: true,
            include_dialogue: true,
            max_summary_length: Some(400),
        }
    }
}

/// Everything the engine can be tuned with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Recent turns excluded from summarized injection.
    pub running_window: usize,
    pub pairing: PairingPolicy,
    pub summary: SummaryOptions,
    pub weights: WeightConfig,
    /// Query the vector index during composition.
    pub semantic_retrieval: bool,
    pub semantic_top_k: usize,
    /// Flat, non-tiered composition for hosts that want the old behavior.
    pub legacy_composition: bool,
    /// Inject ledger facts learned in other conversations.
    pub cross_session_facts: bool,
    pub ledger_retention_days: i64,
    pub retained_conversations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            running_window: DEFAULT_RUNNING_WINDOW,
            pairing: PairingPolicy::default(),
            summary: SummaryOptions::default(),
            weights: WeightConfig::default(),
            semantic_retrieval: true,
            semantic_top_k: DEFAULT_SEMANTIC_TOP_K,
            legacy_composition: false,
            cross_session_facts: true,
            ledger_retention_days: DEFAULT_RETENTION_DAYS,
            retained_conversations: DEFAULT_RETAINED_CONVERSATIONS,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_running_window(mut self, turns: usize) -> Self {
        self.running_window = turns;
        self
    }

    pub fn with_pairing(mut self, pairing: PairingPolicy) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_summary_options(mut self, options: SummaryOptions) -> Self {
        self.summary = options;
        self
    }

    pub fn with_weights(mut self, weights: WeightConfig) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_semantic_retrieval(mut self, enabled: bool) -> Self {
        self.semantic_retrieval = enabled;
        self
    }

    pub fn with_legacy_composition(mut self, enabled: bool) -> Self {
        self.legacy_composition = enabled;
        self
    }

    pub fn with_cross_session_facts(mut self, enabled: bool) -> Self {
        self.cross_session_facts = enabled;
        self
    }

    pub fn with_ledger_retention_days(mut self, days: i64) -> Self {
        self.ledger_retention_days = days;
        self
    }

    pub fn with_retained_conversations(mut self, count: usize) -> Self {
        self.retained_conversations = count;
        self
    }
}
