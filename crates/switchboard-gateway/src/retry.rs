use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Bounded retry schedule for gateway requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: usize,
    /// Delay before the first retry; each later retry doubles it.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delays without jitter: base, 2*base, 4*base, ... capped at `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields base^n, so start from 2 and scale by half the base delay
        let half = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(half)
            .max_delay(self.max_delay)
            .take(self.max_retries)
    }

    /// The schedule handed to `tokio_retry`, with jitter applied.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        self.delays().map(jitter)
    }
}
