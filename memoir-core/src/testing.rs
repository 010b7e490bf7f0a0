//! Test doubles for exercising the engine without a live provider.
//!
//! [`MockProvider`] replays a scripted sequence of responses and
//! [`ManualScheduler`] runs a virtual clock, so queue timing (backoff,
//! throttle, watchdog) can be asserted without real sleeps. Both are
//! cheaply cloneable handles over shared state: keep a clone outside the
//! engine to inspect calls afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::provider::{CompletionProvider, ProviderError};
use crate::scheduler::Scheduler;
use crate::transcript::Turn;

#[derive(Default)]
struct MockState {
    script: VecDeque<Result<String, String>>,
    calls: usize,
}

/// A scripted completion provider. Responses are consumed in order; a call
/// past the end of the script fails.
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful response.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Script a successful but empty response.
    pub fn respond_empty(self) -> Self {
        self.push(Ok(String::new()));
        self
    }

    /// Script a network failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    /// How many times `generate` has been called.
    pub fn calls(&self) -> usize {
        self.inner.lock().expect("mock state lock poisoned").calls
    }

    fn push(&self, entry: Result<String, String>) {
        self.inner
            .lock()
            .expect("mock state lock poisoned")
            .script
            .push_back(entry);
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        let mut state = self.inner.lock().expect("mock state lock poisoned");
        state.calls += 1;
        match state.script.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ProviderError::Network(message)),
            None => Err(ProviderError::Network("mock script exhausted".to_string())),
        }
    }
}

struct ClockState {
    now: DateTime<Utc>,
    slept: Vec<Duration>,
}

/// A virtual-time scheduler. `sleep` returns immediately, records the
/// requested duration, and advances the clock by it.
#[derive(Clone)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ClockState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockState { now, slept: Vec::new() })),
        }
    }

    /// Jump the clock forward without recording a sleep.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut state = self.inner.lock().expect("clock lock poisoned");
        state.now += duration;
    }

    /// Every sleep requested so far, in order.
    pub fn slept(&self) -> Vec<Duration> {
        self.inner.lock().expect("clock lock poisoned").slept.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.inner
            .lock()
            .expect("clock lock poisoned")
            .slept
            .iter()
            .sum()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    async fn sleep(&self, duration: Duration) {
        let mut state = self.inner.lock().expect("clock lock poisoned");
        state.slept.push(duration);
        state.now += chrono::Duration::milliseconds(duration.as_millis() as i64);
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().expect("clock lock poisoned").now
    }
}

/// Alternating user/character turns for quick transcript setup: even
/// indices are user turns, odd indices belong to "Marcus".
pub fn sample_turns(n: usize) -> Vec<Turn> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Turn::user(format!("user turn {i}"))
            } else {
                Turn::character("Marcus", format!("character turn {i}"))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_replays_script_in_order() {
        let provider = MockProvider::new().respond("first").fail("boom").respond("second");

        assert_eq!(provider.generate("p").await.unwrap(), "first");
        assert!(matches!(
            provider.generate("p").await,
            Err(ProviderError::Network(m)) if m == "boom"
        ));
        assert_eq!(provider.generate("p").await.unwrap(), "second");
        assert_eq!(provider.calls(), 3);

        // Past the end of the script every call fails.
        assert!(provider.generate("p").await.is_err());
    }

    #[tokio::test]
    async fn test_manual_scheduler_advances_on_sleep() {
        let scheduler = ManualScheduler::new();
        let start = scheduler.now();

        scheduler.sleep(Duration::from_secs(2)).await;
        scheduler.sleep(Duration::from_millis(500)).await;

        assert_eq!(scheduler.now() - start, chrono::Duration::milliseconds(2500));
        assert_eq!(
            scheduler.slept(),
            vec![Duration::from_secs(2), Duration::from_millis(500)]
        );
        assert_eq!(scheduler.total_slept(), Duration::from_millis(2500));
    }

    #[test]
    fn test_manual_scheduler_advance_skips_sleep_log() {
        let scheduler = ManualScheduler::new();
        let start = scheduler.now();

        scheduler.advance(chrono::Duration::days(3));

        assert_eq!(scheduler.now() - start, chrono::Duration::days(3));
        assert!(scheduler.slept().is_empty());
    }

    #[test]
    fn test_sample_turns_alternate_speakers() {
        let turns = sample_turns(4);
        assert_eq!(turns.len(), 4);
        assert!(turns[0].speaker.is_none());
        assert_eq!(turns[1].speaker.as_deref(), Some("Marcus"));
        assert!(turns[2].speaker.is_none());
        assert_eq!(turns[3].speaker.as_deref(), Some("Marcus"));
    }
}
