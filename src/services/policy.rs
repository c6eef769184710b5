use rand::Rng;
use std::time::Duration;

/// Simulated processing latency: a delay drawn uniformly from
/// `min, min + step, ..., max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    min: Duration,
    max: Duration,
    step: Duration,
}

impl DelayPolicy {
    pub fn new(min: Duration, max: Duration, step: Duration) -> Result<Self, PolicyError> {
        if min > max {
            return Err(PolicyError::DelayBounds { min, max });
        }
        if min < max && step.is_zero() {
            return Err(PolicyError::ZeroStep);
        }
        Ok(Self { min, max, step })
    }

    /// No simulated latency.
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
            step: Duration::ZERO,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let span = (self.max - self.min).as_nanos() / self.step.as_nanos();
        let steps = u32::try_from(span).unwrap_or(u32::MAX);
        self.min + self.step * rng.gen_range(0..=steps)
    }
}

impl Default for DelayPolicy {
    /// 5 to 300 seconds in 5 second steps.
    fn default() -> Self {
        Self {
            min: Duration::from_secs(5),
            max: Duration::from_secs(300),
            step: Duration::from_secs(5),
        }
    }
}

/// How many delivery attempts a failing job gets before its message is
/// dropped. Unbounded by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn bounded(max_attempts: u32) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts: Some(max_attempts),
        })
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether a delivery that failed on `attempt` goes back on the queue.
    pub fn should_requeue(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Largest number of handlers one processor may run at once: what a single
/// semaphore can hold and what `acquire_many` can take back on drain.
pub fn max_concurrency() -> usize {
    (u32::MAX as usize).min(tokio::sync::Semaphore::MAX_PERMITS)
}

/// Check a requested handler count against `1..=max_concurrency()`.
pub fn worker_concurrency(requested: usize) -> Result<usize, PolicyError> {
    let max = max_concurrency();
    if requested == 0 || requested > max {
        return Err(PolicyError::Concurrency { requested, max });
    }
    Ok(requested)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PolicyError {
    #[error("Minimum delay {min:?} exceeds maximum delay {max:?}")]
    DelayBounds { min: Duration, max: Duration },

    #[error("Delay step must be non-zero when the delay range is non-empty")]
    ZeroStep,

    #[error("Max attempts must be at least 1")]
    ZeroAttempts,

    #[error("Worker concurrency {requested} is outside 1..={max}")]
    Concurrency { requested: usize, max: usize },
}
