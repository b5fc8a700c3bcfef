use std::time::Duration;

use crate::config::FailoverOptions;

/// Delay schedule between connection attempts.
///
/// With exponential back-off the delay starts at `retry_delay` and is
/// multiplied by `back_off_multiplier` after every attempt, capped at
/// `max_retry_delay`. Otherwise every attempt waits `retry_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    multiplier: f64,
    exponential: bool,
    current: Duration,
}

impl Backoff {
    pub fn new(options: &FailoverOptions) -> Self {
        Self {
            max: options.max_retry_delay,
            multiplier: if options.back_off_multiplier.is_finite() {
                options.back_off_multiplier.max(1.0)
            } else {
                1.0
            },
            exponential: options.use_exponential_back_off,
            current: options.retry_delay,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        if self.exponential {
            let next = self.current.as_secs_f64() * self.multiplier;
            self.current = Duration::try_from_secs_f64(next)
                .unwrap_or(self.max)
                .min(self.max);
        }
        delay
    }
}
