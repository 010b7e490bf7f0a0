//! Time abstraction.
//!
//! Every delay and every clock read in the engine goes through this trait,
//! so tests can run backoff schedules and decay curves on a virtual clock
//! with no real sleeping. Production uses [`TokioScheduler`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);

    fn now(&self) -> DateTime<Utc>;
}

/// Real sleeps, real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
