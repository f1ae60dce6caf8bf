//! Full-cycle retry strategies.
//!
//! A [`RetryStrategy`] maps the number of exhausted cycles so far (starting
//! at 1) to the delay before the next cycle, or to `None` to give up. It is
//! consulted only after every known monitor has failed in one pass; failures
//! of individual monitors advance to the next monitor immediately.

use std::{fmt, sync::Arc, time::Duration};

use backon::{BackoffBuilder, ExponentialBuilder};
use rand::Rng;

/// Default step for [`RetryStrategy::default`].
const DEFAULT_LINEAR_STEP: Duration = Duration::from_millis(10);

/// Default cap for [`RetryStrategy::default`].
const DEFAULT_LINEAR_CAP: Duration = Duration::from_secs(1);

/// Retry strategy signature: exhausted-cycle count to delay, `None` stops.
pub type RetryFn = dyn Fn(u32) -> Option<Duration> + Send + Sync;

/// Decides whether and when to start another pass over the monitors.
#[derive(Clone)]
pub struct RetryStrategy {
    delay: Arc<RetryFn>,
}

impl RetryStrategy {
    /// Wraps an arbitrary strategy function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(u32) -> Option<Duration> + Send + Sync + 'static,
    {
        Self { delay: Arc::new(f) }
    }

    /// Waits the same delay before every retry.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::from_fn(move |_| Some(delay))
    }

    /// Waits `attempt * step`, capped at `max`.
    #[must_use]
    pub fn linear(step: Duration, max: Duration) -> Self {
        Self::from_fn(move |attempt| Some(step.saturating_mul(attempt).min(max)))
    }

    /// Waits `initial * factor^(attempt - 1)`, capped at `max`, with `±jitter`
    /// randomness applied on top.
    #[must_use]
    pub fn exponential(initial: Duration, max: Duration, factor: f32, jitter: f64) -> Self {
        let backoff = ExponentialBuilder::new()
            .with_min_delay(initial)
            .with_max_delay(max)
            .with_factor(factor)
            .without_max_times();
        Self::from_fn(move |attempt| {
            let index = attempt.saturating_sub(1) as usize;
            let base = backoff.build().nth(index).unwrap_or(max);
            Some(apply_jitter(base, jitter))
        })
    }

    /// Gives up once more than `max_attempts` cycles have been exhausted.
    #[must_use]
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        let inner = self.delay;
        Self::from_fn(move |attempt| if attempt > max_attempts { None } else { inner(attempt) })
    }

    /// Returns the delay before the next cycle, or `None` to stop retrying.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (self.delay)(attempt)
    }
}

impl Default for RetryStrategy {
    /// Linear: 10ms per exhausted cycle, capped at one second.
    fn default() -> Self {
        Self::linear(DEFAULT_LINEAR_STEP, DEFAULT_LINEAR_CAP)
    }
}

impl fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryStrategy(..)")
    }
}

/// Apply jitter to a duration.
///
/// Jitter adds randomness in the range `[dur * (1 - factor), dur * (1 + factor)]`
/// so that many clients losing the same monitors do not retry in lockstep.
fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || dur.is_zero() {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rand::rng().random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}
