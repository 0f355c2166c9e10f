use rand::random;
use std::time::Duration;

/// Rule for choosing how long to wait before the next attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Strategy {
    /// A fixed wait between every attempt.
    Every(Duration),
    /// A wait which roughly doubles after each attempt.
    Backoff(ExponentialBackoff),
}

impl Strategy {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        match self {
            Self::Every(t) => *t,
            Self::Backoff(exp) => exp.retry_in(last_wait),
        }
    }
}

/// Doubles the previous wait, perturbs it by a random jitter, then clamps it to `min..=max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// Shortest permitted wait, and the wait before the first attempt.
    ///
    /// *Defaults to 0.25s.*
    pub min: Duration,
    /// Longest permitted wait. Values below `min` are treated as `min`.
    ///
    /// *Defaults to 10s.*
    pub max: Duration,
    /// Relative size of the uniform random jitter, so that `0.1` varies each wait by
    /// up to ±10%.
    ///
    /// Values are clamped to `0.0..=1.0`.
    ///
    /// *Defaults to `0.1`.*
    pub jitter: f32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(250),
            max: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        let base = last_wait.map_or(self.min, |t| t.saturating_mul(2));

        let jitter = self.jitter.clamp(0.0, 1.0);
        let scale = 1.0 + jitter * (2.0 * random::<f32>() - 1.0);

        let max = self.max.max(self.min);
        let target = base.min(max).mul_f32(scale);

        target.clamp(self.min, max)
    }
}
