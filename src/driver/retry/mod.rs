//! Pacing for attempts to resume a lost voice session.

mod strategy;

pub use self::strategy::*;

use std::time::Duration;

/// How the driver retries a session which dropped without being invalidated.
///
/// Each retry asks the relay to resume the old session. Once the limit is spent,
/// the driver makes one final attempt to identify from scratch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Retry {
    /// Wait between consecutive resume attempts.
    ///
    /// *Defaults to an [`ExponentialBackoff`] from 0.25s to 10s, with a
    /// jitter of `0.1`.*
    ///
    /// [`ExponentialBackoff`]: Strategy::Backoff
    pub strategy: Strategy,
    /// Number of resume attempts made before giving up on the old session.
    ///
    /// `None` retries forever, while `Some(0)` moves straight to a fresh identify.
    ///
    /// *Defaults to `Some(5)`.*
    pub retry_limit: Option<usize>,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            strategy: Strategy::Backoff(ExponentialBackoff::default()),
            retry_limit: Some(5),
        }
    }
}

impl Retry {
    /// Yields the wait before each resume attempt, ending once the limit is reached.
    pub(crate) fn delays(&self) -> Delays {
        Delays {
            strategy: self.strategy,
            remaining: self.retry_limit,
            last: None,
        }
    }
}

/// Wait times for successive attempts under a [`Retry`] policy.
#[derive(Clone, Debug)]
pub(crate) struct Delays {
    strategy: Strategy,
    remaining: Option<usize>,
    last: Option<Duration>,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.checked_sub(1)?;
        }

        let wait = self.strategy.retry_in(self.last);
        self.last = Some(wait);

        Some(wait)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_bounds_attempts() {
        let retry = Retry {
            strategy: Strategy::Every(Duration::from_millis(10)),
            retry_limit: Some(3),
        };

        let waits: Vec<_> = retry.delays().collect();
        assert_eq!(waits, vec![Duration::from_millis(10); 3]);
    }

    #[test]
    fn zero_limit_skips_resume() {
        let retry = Retry {
            retry_limit: Some(0),
            ..Default::default()
        };

        assert_eq!(retry.delays().next(), None);
    }

    #[test]
    fn unlimited_retries_keep_going() {
        let retry = Retry {
            retry_limit: None,
            ..Default::default()
        };

        assert_eq!(retry.delays().take(100).count(), 100);
    }
}
