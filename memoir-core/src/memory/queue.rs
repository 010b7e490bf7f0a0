//! Summarization queue, retry machinery, and the stuck-flag watchdog.
//!
//! The queue itself is plain synchronous state: pending units in FIFO
//! order, a busy flag, a bulk-operation block. All awaiting lives in the
//! engine's drain loop, which owns the provider and the store. Retry and
//! fallback control flow is an explicit [`RetryState`] machine rather than
//! nested error handling, so every path a unit can take is enumerable.
//!
//! A drain future can be dropped at a suspension point without reaching its
//! cleanup, leaving the busy flag set forever. The watchdog exists for that
//! case: on a fixed interval it clears a busy flag that has been set with
//! an empty queue for longer than the interval.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;

use super::pairing::SummaryUnit;
use crate::config::SummaryOptions;
use crate::transcript::Transcript;

/// Provider attempts per unit before the brief-prompt fallback.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delays before attempt 2, attempt 3, and the fallback.
pub const BACKOFF_BASES: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
];

/// Upper bound on the random jitter added to each backoff delay.
pub const BACKOFF_JITTER_MS: u64 = 250;

/// Pause between consecutive units in one drain.
pub const UNIT_THROTTLE: Duration = Duration::from_millis(500);

/// Delay before a blocked drain re-checks the bulk-operation flag.
pub const BLOCKED_RECHECK: Duration = Duration::from_secs(2);

/// Minimum period between watchdog inspections, and how stale a busy flag
/// must be before the watchdog clears it.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(300);

/// How many turns preceding a unit ride along as prompt context.
const PROMPT_CONTEXT_TURNS: usize = 4;

const PRIMARY_PREAMBLE: &str = include_str!("prompts/summarize.txt");
const BRIEF_PREAMBLE: &str = include_str!("prompts/summarize_brief.txt");

// ============================================================================
// Retry state machine
// ============================================================================

/// Where a unit stands in its retry sequence. Transitions only move
/// forward: `Attempt {1} → Attempt {2} → Attempt {3} → FallbackAttempt →
/// Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Regular attempt `n` (1-based) with the primary prompt.
    Attempt { n: u32 },
    /// Final try with the terse secondary prompt.
    FallbackAttempt,
    /// Every avenue failed; the unit yields no record.
    Exhausted,
}

impl RetryState {
    pub fn first() -> Self {
        RetryState::Attempt { n: 1 }
    }

    /// The state after this one fails.
    pub fn next(self) -> Self {
        match self {
            RetryState::Attempt { n } if n < MAX_ATTEMPTS => RetryState::Attempt { n: n + 1 },
            RetryState::Attempt { .. } => RetryState::FallbackAttempt,
            RetryState::FallbackAttempt | RetryState::Exhausted => RetryState::Exhausted,
        }
    }

    /// Whether this state calls the provider with the secondary prompt.
    pub fn uses_brief_prompt(self) -> bool {
        matches!(self, RetryState::FallbackAttempt)
    }

    /// Delay to wait before entering this state, if any. Regular retries
    /// walk the first bases in order; the fallback waits out the longest
    /// base before its final try.
    pub fn backoff(self) -> Option<Duration> {
        match self {
            RetryState::Attempt { n: 1 } => None,
            RetryState::Attempt { n } => {
                let slot = (n as usize - 2).min(BACKOFF_BASES.len() - 1);
                Some(BACKOFF_BASES[slot])
            }
            RetryState::FallbackAttempt => Some(BACKOFF_BASES[BACKOFF_BASES.len() - 1]),
            RetryState::Exhausted => None,
        }
    }
}

/// Add random jitter to a backoff base so simultaneous clients do not
/// retry in lockstep.
pub fn jittered(base: Duration) -> Duration {
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS))
}

fn watchdog_interval() -> chrono::Duration {
    chrono::Duration::seconds(WATCHDOG_INTERVAL.as_secs() as i64)
}

// ============================================================================
// Indicator events
// ============================================================================

/// Fired after each unit so a host UI can show summarization activity.
/// Handlers must not block.
#[derive(Debug, Clone)]
pub enum SummaryEvent {
    Started { target_index: usize },
    Completed { target_index: usize, core_memory: bool },
    Failed { target_index: usize, attempts: u32 },
}

pub type IndicatorHook = Box<dyn Fn(&SummaryEvent) + Send + Sync>;

// ============================================================================
// Queue state
// ============================================================================

/// Pending units plus the flags the drain loop coordinates through.
#[derive(Debug, Default)]
pub struct SummaryQueue {
    pending: VecDeque<SummaryUnit>,
    busy: bool,
    busy_since: Option<DateTime<Utc>>,
    blocked: bool,
    last_watchdog: Option<DateTime<Utc>>,
}

impl SummaryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Set or clear the bulk-operation gate. While set, drains sleep and
    /// re-check instead of calling the provider.
    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    /// Add a unit unless one with the same target is already pending.
    /// Returns whether the unit was added.
    pub fn enqueue(&mut self, unit: SummaryUnit) -> bool {
        if self.pending.iter().any(|u| u.target_index == unit.target_index) {
            debug!(
                "[memory:queue] unit for index {} already pending, skipped",
                unit.target_index
            );
            return false;
        }
        self.pending.push_back(unit);
        true
    }

    /// Claim the queue for a drain. Returns false when a drain already
    /// holds it, making re-entrant calls no-ops.
    pub fn begin_drain(&mut self, now: DateTime<Utc>) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;
        self.busy_since = Some(now);
        true
    }

    pub fn end_drain(&mut self) {
        self.busy = false;
        self.busy_since = None;
    }

    pub fn take_next(&mut self) -> Option<SummaryUnit> {
        self.pending.pop_front()
    }

    /// Whether enough time has passed since the last watchdog inspection.
    pub fn watchdog_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_watchdog {
            None => true,
            Some(last) => now - last >= watchdog_interval(),
        }
    }

    /// Inspect the busy flag and clear it when stuck: set, queue empty, and
    /// stale for at least the watchdog interval. Returns whether the flag
    /// was cleared.
    pub fn watchdog_tick(&mut self, now: DateTime<Utc>) -> bool {
        self.last_watchdog = Some(now);

        let stale = self
            .busy_since
            .is_some_and(|since| now - since >= watchdog_interval());
        if self.busy && self.pending.is_empty() && stale {
            warn!("[memory:queue] watchdog cleared a stuck busy flag");
            self.end_drain();
            return true;
        }
        false
    }
}

// ============================================================================
// Prompt assembly
// ============================================================================

/// Build the provider prompt for one unit: preamble, option instructions,
/// capped preceding context, then the unit's own turns.
pub fn build_prompt(
    unit: &SummaryUnit,
    transcript: &Transcript,
    options: &SummaryOptions,
    brief: bool,
) -> String {
    let preamble = if brief { BRIEF_PREAMBLE } else { PRIMARY_PREAMBLE };
    let mut prompt = String::from(preamble.trim_end());
    prompt.push_str("\n\n");

    if !brief {
        if options.include_time_location {
            prompt.push_str("Note the time and location when the scene makes them evident.\n");
        }
        if options.include_present_entities {
            prompt.push_str("Note which characters are present.\n");
        }
        if options.include_dialogue {
            prompt.push_str("Quote one short line of dialogue if it is pivotal.\n");
        }
    }
    if let Some(max) = options.max_summary_length {
        prompt.push_str(&format!("Keep the summary under {max} characters.\n"));
    }

    let first_source = unit.source_indices.iter().copied().min().unwrap_or(0);
    let context_start = first_source.saturating_sub(PROMPT_CONTEXT_TURNS);
    if context_start < first_source {
        prompt.push_str("\nRecent context:\n");
        for i in context_start..first_source {
            if let Some(rendered) = transcript.render_turn(i) {
                prompt.push_str(&rendered);
                prompt.push('\n');
            }
        }
    }

    prompt.push_str("\nSummarize this exchange:\n");
    for &i in &unit.source_indices {
        if let Some(rendered) = transcript.render_turn(i) {
            prompt.push_str(&rendered);
            prompt.push('\n');
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Turn;

    fn unit(target: usize, sources: Vec<usize>) -> SummaryUnit {
        SummaryUnit {
            source_indices: sources,
            target_index: target,
        }
    }

    #[test]
    fn test_retry_states_advance_in_order() {
        let mut state = RetryState::first();
        let mut seen = vec![state];
        for _ in 0..5 {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                RetryState::Attempt { n: 1 },
                RetryState::Attempt { n: 2 },
                RetryState::Attempt { n: 3 },
                RetryState::FallbackAttempt,
                RetryState::Exhausted,
                RetryState::Exhausted,
            ]
        );
    }

    #[test]
    fn test_only_fallback_uses_brief_prompt() {
        assert!(!RetryState::Attempt { n: 1 }.uses_brief_prompt());
        assert!(!RetryState::Attempt { n: 3 }.uses_brief_prompt());
        assert!(RetryState::FallbackAttempt.uses_brief_prompt());
        assert!(!RetryState::Exhausted.uses_brief_prompt());
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(RetryState::Attempt { n: 1 }.backoff(), None);
        assert_eq!(
            RetryState::Attempt { n: 2 }.backoff(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            RetryState::Attempt { n: 3 }.backoff(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            RetryState::FallbackAttempt.backoff(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(RetryState::Exhausted.backoff(), None);
    }

    #[test]
    fn test_jitter_bounded() {
        let base = Duration::from_secs(2);
        for _ in 0..50 {
            let delayed = jittered(base);
            assert!(delayed >= base);
            assert!(delayed <= base + Duration::from_millis(BACKOFF_JITTER_MS));
        }
    }

    #[test]
    fn test_enqueue_dedups_by_target() {
        let mut queue = SummaryQueue::new();
        assert!(queue.enqueue(unit(2, vec![1, 2])));
        assert!(!queue.enqueue(unit(2, vec![1, 2])));
        assert!(queue.enqueue(unit(4, vec![3, 4])));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = SummaryQueue::new();
        queue.enqueue(unit(0, vec![0]));
        queue.enqueue(unit(2, vec![1, 2]));

        assert_eq!(queue.take_next().map(|u| u.target_index), Some(0));
        assert_eq!(queue.take_next().map(|u| u.target_index), Some(2));
        assert_eq!(queue.take_next(), None);
    }

    #[test]
    fn test_begin_drain_is_reentrant_noop() {
        let mut queue = SummaryQueue::new();
        let now = Utc::now();
        assert!(queue.begin_drain(now));
        assert!(!queue.begin_drain(now));
        queue.end_drain();
        assert!(queue.begin_drain(now));
    }

    #[test]
    fn test_watchdog_clears_stale_busy_flag() {
        let mut queue = SummaryQueue::new();
        let start = Utc::now();
        queue.begin_drain(start);

        // Fresh flag: left alone.
        assert!(!queue.watchdog_tick(start + chrono::Duration::seconds(10)));
        assert!(queue.is_busy());

        // Stale flag with an empty queue: cleared.
        assert!(queue.watchdog_tick(start + chrono::Duration::seconds(301)));
        assert!(!queue.is_busy());
    }

    #[test]
    fn test_watchdog_leaves_active_drain_alone() {
        let mut queue = SummaryQueue::new();
        let start = Utc::now();
        queue.begin_drain(start);
        queue.enqueue(unit(0, vec![0]));

        // Busy and stale, but work is still pending.
        assert!(!queue.watchdog_tick(start + chrono::Duration::seconds(400)));
        assert!(queue.is_busy());
    }

    #[test]
    fn test_watchdog_due_respects_interval() {
        let mut queue = SummaryQueue::new();
        let start = Utc::now();
        assert!(queue.watchdog_due(start));

        queue.watchdog_tick(start);
        assert!(!queue.watchdog_due(start + chrono::Duration::seconds(100)));
        assert!(queue.watchdog_due(start + chrono::Duration::seconds(300)));
    }

    #[test]
    fn test_prompt_contains_unit_and_capped_context() {
        let mut transcript = Transcript::new();
        for i in 0..8 {
            transcript.push(Turn::user(format!("turn number {i}")));
        }

        let prompt = build_prompt(
            &unit(6, vec![5, 6]),
            &transcript,
            &SummaryOptions::default(),
            false,
        );

        assert!(prompt.contains("turn number 5"));
        assert!(prompt.contains("turn number 6"));
        // Context window reaches back four turns from the unit, no further.
        assert!(prompt.contains("turn number 1"));
        assert!(!prompt.contains("turn number 0"));
    }

    #[test]
    fn test_prompt_honors_option_toggles() {
        let mut transcript = Transcript::new();
        transcript.push(Turn::user("hello there"));

        let mut options = SummaryOptions::default();
        options.max_summary_length = Some(150);
        options.include_dialogue = false;

        let prompt = build_prompt(&unit(0, vec![0]), &transcript, &options, false);
        assert!(prompt.contains("under 150 characters"));
        assert!(!prompt.contains("dialogue"));
    }

    #[test]
    fn test_brief_prompt_skips_option_instructions() {
        let mut transcript = Transcript::new();
        transcript.push(Turn::user("hello there"));

        let brief = build_prompt(
            &unit(0, vec![0]),
            &transcript,
            &SummaryOptions::default(),
            true,
        );
        assert!(brief.contains("hello there"));
        assert!(!brief.contains("characters are present"));
    }
}
