use crate::{EngineError, Result};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Source of scheduled delays: per-item pacing and per-attempt backoff both
/// go through this so they can be observed or replaced.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (0-based): `2^attempt` base delays.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1_u32 << attempt.min(20))
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have failed,
/// returning the last error unchanged. Non-retryable errors are returned
/// immediately. `on_retry` sees each failure that will be retried along with
/// the delay about to be applied.
pub fn with_retries<T, F, R>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
    mut on_retry: R,
) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
    R: FnMut(u32, &EngineError, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0_u32;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt + 1 >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                on_retry(attempt, &err, delay);
                sleeper.sleep(delay);
                attempt += 1;
            }
        }
    }
}
