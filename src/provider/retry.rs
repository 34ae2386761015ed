use crate::config::RetrySettings;
use crate::failure::FailureCategory;
use std::time::Duration;

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Allows one extra attempt after an empty response.
    pub retry_empty_response: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            retry_empty_response: settings.retry_empty_response,
        }
    }

    pub fn is_retryable(&self, category: FailureCategory) -> bool {
        category.is_transient()
            || (category == FailureCategory::EmptyResponseError && self.retry_empty_response)
    }

    /// `attempt` is the 1-based number of the attempt that just failed;
    /// `empty_retries` counts retries already spent on empty responses.
    pub fn should_retry(&self, category: FailureCategory, attempt: u32, empty_retries: u32) -> bool {
        if attempt >= self.max_attempts || !self.is_retryable(category) {
            return false;
        }
        category != FailureCategory::EmptyResponseError || empty_retries == 0
    }

    /// Delay after failed attempt `attempt`: base, 2×base, 4×base, … capped at
    /// `max_delay`. A server hint (Retry-After) replaces the computed delay,
    /// still capped.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let computed = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        match hint {
            Some(hint) => hint.min(self.max_delay),
            None => computed,
        }
    }
}
