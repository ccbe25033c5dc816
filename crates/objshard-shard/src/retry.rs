use std::time::Duration;

/// Delay between listing retries.
#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    /// The same delay after every failure.
    Fixed(Duration),
    /// `initial * multiplier^(n-1)` after the n-th failure, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

/// Retry policy for continuation pages of a listing.
///
/// The default never gives up and waits a fixed 100 ms between attempts,
/// which keeps a listing alive across transient backend hiccups but can
/// stall forever on a backend that is permanently down. Set `max_attempts`
/// or `max_elapsed` to bound it.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first. `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the first failure.
    pub max_elapsed: Option<Duration>,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(100))
    }
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            max_elapsed: None,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// At most `max_attempts` attempts with a fixed delay.
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::unbounded(delay)
        }
    }

    /// Never retry: the first failure is final.
    pub fn none() -> Self {
        Self::bounded(1, Duration::ZERO)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Whether another attempt is allowed after `failures` failed attempts,
    /// `elapsed` after the first of them.
    pub fn should_retry(&self, failures: u32, elapsed: Duration) -> bool {
        if let Some(max) = self.max_attempts {
            if failures >= max {
                return false;
            }
        }
        if let Some(max) = self.max_elapsed {
            if elapsed >= max {
                return false;
            }
        }
        true
    }

    /// Wait before the attempt that follows the `failures`-th failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exp = failures.saturating_sub(1).min(64) as i32;
                let nanos = initial.as_nanos() as f64 * multiplier.max(1.0).powi(exp);
                if nanos.is_finite() && nanos < max.as_nanos() as f64 {
                    Duration::from_nanos(nanos.round() as u64)
                } else {
                    *max
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unbounded_fixed_100ms() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1000), Duration::from_millis(100));
        assert!(policy.should_retry(u32::MAX - 1, Duration::from_secs(86_400)));
    }

    #[test]
    fn bounded_counts_total_attempts() {
        let policy = RetryPolicy::bounded(3, Duration::from_millis(1));
        assert!(policy.should_retry(1, Duration::ZERO));
        assert!(policy.should_retry(2, Duration::ZERO));
        assert!(!policy.should_retry(3, Duration::ZERO));
    }

    #[test]
    fn none_gives_up_on_first_failure() {
        assert!(!RetryPolicy::none().should_retry(1, Duration::ZERO));
    }

    #[test]
    fn max_elapsed_stops_retrying() {
        let policy = RetryPolicy::default().with_max_elapsed(Duration::from_secs(1));
        assert!(policy.should_retry(5, Duration::from_millis(999)));
        assert!(!policy.should_retry(5, Duration::from_secs(1)));
    }

    #[test]
    fn exponential_grows_and_caps() {
        let policy = RetryPolicy::default().with_backoff(Backoff::Exponential {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
            multiplier: 2.0,
        });
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(500), Duration::from_millis(100));
    }
}
