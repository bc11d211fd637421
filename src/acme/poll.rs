use std::fmt::Debug;
use std::time::Duration;

/// Decides how long to wait before each status poll. Attempts are numbered from zero.
pub trait PollStrategy: Debug + Send + Sync {
    fn delay(&self, attempt: usize) -> Duration;
}

/// Waits the same amount of time before every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        Self(Duration::from_secs(2))
    }
}

impl PollStrategy for FixedDelay {
    fn delay(&self, _attempt: usize) -> Duration {
        self.0
    }
}

/// Doubles the delay with every attempt, starting at `initial` and never exceeding `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl PollStrategy for ExponentialBackoff {
    fn delay(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Polls without waiting. Useful against test authorities that answer instantly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Immediate;

impl PollStrategy for Immediate {
    fn delay(&self, _attempt: usize) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Duration::from_millis(500))]
    #[case(1, Duration::from_secs(1))]
    #[case(2, Duration::from_secs(2))]
    #[case(4, Duration::from_secs(5))]
    #[case(64, Duration::from_secs(5))]
    fn test_exponential_backoff(#[case] attempt: usize, #[case] expected: Duration) {
        let strategy = ExponentialBackoff {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
        };
        assert_eq!(strategy.delay(attempt), expected);
    }

    #[test]
    fn test_fixed_delay_ignores_attempt() {
        let strategy = FixedDelay::default();
        assert_eq!(strategy.delay(0), strategy.delay(4));
        assert_eq!(Immediate.delay(3), Duration::ZERO);
    }
}
