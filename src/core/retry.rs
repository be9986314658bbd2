use crate::config::{LeaderboardConfig, MAX_BACKOFF_DOUBLINGS, backoff_for};
use crate::error::LeaderboardError;
use log::{info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Where backoff delays are spent. Swapped out in tests for a recording clock.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn from_config(config: &LeaderboardConfig) -> Self {
        Self::new(config.max_retries, config.base_backoff)
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Longest [`run`](Self::run) can take when every attempt uses its whole
    /// `attempt_budget` and every backoff is slept. Saturates at `Duration::MAX`.
    pub fn worst_case(&self, attempt_budget: Duration) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let mut total = attempt_budget.saturating_mul(attempts);

        let doubling = self.max_retries.min(MAX_BACKOFF_DOUBLINGS + 1);
        for retry in 1..=doubling {
            total = total.saturating_add(backoff_for(self.base_backoff, retry));
        }
        let flat = self.max_retries - doubling;
        total.saturating_add(backoff_for(self.base_backoff, doubling + 1).saturating_mul(flat))
    }

    /// Runs `attempt` until it succeeds, fails terminally, or the retry budget
    /// is spent. The closure receives the 1-based attempt number.
    ///
    /// Only [`LeaderboardError::Transport`] failures are retried. Exhaustion is
    /// reported as [`LeaderboardError::Exhausted`] carrying the last failure.
    pub fn run<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut(u32) -> Result<T, LeaderboardError>,
    ) -> Result<T, LeaderboardError> {
        let mut retries = 0;
        loop {
            let err = match attempt(retries + 1) {
                Ok(value) => {
                    if retries > 0 {
                        info!("{} succeeded after {} retries.", operation, retries);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let last = match err {
                LeaderboardError::Transport(last) => last,
                terminal => {
                    warn!("{} failed, not retrying: {}", operation, terminal);
                    return Err(terminal);
                }
            };

            if retries >= self.max_retries {
                warn!("{} failed after {} attempts: {}", operation, retries + 1, last);
                return Err(LeaderboardError::Exhausted {
                    attempts: retries + 1,
                    last,
                });
            }

            retries += 1;
            let delay = backoff_for(self.base_backoff, retries);
            warn!(
                "{} failed ({}), retry {}/{} in {:?}",
                operation, last, retries, self.max_retries, delay
            );
            self.sleeper.sleep(delay);
        }
    }
}
