//! Retry policies for connection and send loops

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum allowed bounded retry attempts
const MAX_RETRY_ATTEMPTS: u32 = 1000;
/// Maximum backoff duration to prevent excessive delays
const MAX_BACKOFF_SECONDS: u64 = 3600; // 1 hour
/// Maximum multiplier to prevent exponential explosion
const MAX_MULTIPLIER: f64 = 100.0;
/// Maximum jitter factor
const MAX_JITTER_FACTOR: f64 = 1.0;

/// Validate retry count within reasonable bounds
fn validate_max_retries<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<u32>::deserialize(deserializer)?;
    if let Some(value) = value {
        if value > MAX_RETRY_ATTEMPTS {
            return Err(serde::de::Error::custom(format!(
                "max_retries {} exceeds maximum allowed value {}",
                value, MAX_RETRY_ATTEMPTS
            )));
        }
    }
    Ok(value)
}

/// Validate backoff duration within reasonable bounds
fn validate_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = Duration::deserialize(deserializer)?;
    if duration.as_secs() > MAX_BACKOFF_SECONDS {
        return Err(serde::de::Error::custom(format!(
            "duration {:?} exceeds maximum allowed {} seconds",
            duration, MAX_BACKOFF_SECONDS
        )));
    }
    Ok(duration)
}

/// Validate multiplier within reasonable bounds
fn validate_multiplier<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(0.0..=MAX_MULTIPLIER).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "backoff_multiplier {} must be finite and between 0.0 and {}",
            value, MAX_MULTIPLIER
        )));
    }
    Ok(value)
}

/// Validate jitter factor within bounds [0.0, 1.0]
fn validate_jitter<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(0.0..=MAX_JITTER_FACTOR).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "jitter_factor {} must be finite and between 0.0 and {}",
            value, MAX_JITTER_FACTOR
        )));
    }
    Ok(value)
}

/// Retry policy with validated bounds.
///
/// `max_retries: None` retries forever; this is what long-lived consumer
/// sessions use. Bounded policies count retries *after* the first attempt, so
/// `max_retries: Some(2)` allows three attempts in total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries, `None` for unbounded
    #[serde(default, deserialize_with = "validate_max_retries")]
    pub max_retries: Option<u32>,
    /// Initial backoff duration
    #[serde(deserialize_with = "validate_duration")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(deserialize_with = "validate_duration")]
    pub max_backoff: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential)
    #[serde(deserialize_with = "validate_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(deserialize_with = "validate_jitter")]
    pub jitter_factor: f64,
    /// Whether to use exponential backoff
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::producer()
    }
}

impl RetryPolicy {
    /// Three send attempts, ten seconds apart
    pub fn producer() -> Self {
        Self::fixed(2, Duration::from_secs(10))
    }

    /// Reconnect forever, twenty seconds apart
    pub fn consumer() -> Self {
        Self::unbounded(Duration::from_secs(20))
    }

    /// Create a policy with fixed backoff
    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            initial_backoff: backoff,
            max_backoff: backoff,
            exponential: false,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Create a policy that never gives up, with a fixed interval
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            max_retries: None,
            ..Self::fixed(0, interval)
        }
    }

    /// Create a policy with exponential backoff
    pub fn exponential(max_retries: Option<u32>, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff: initial,
            max_backoff: max,
            exponential: true,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    /// Calculate the backoff before retry number `attempt` (1-based)
    pub fn next_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_backoff = if self.exponential {
            let ceiling = if self.initial_backoff.is_zero() {
                1.0
            } else {
                self.max_backoff.as_secs_f64() / self.initial_backoff.as_secs_f64()
            };
            let multiplier = if attempt > 30 {
                ceiling
            } else {
                let multiplier = self.backoff_multiplier.powf((attempt as i32 - 1) as f64);
                if multiplier.is_finite() && multiplier < 1e6 {
                    multiplier
                } else {
                    ceiling
                }
            };
            Duration::from_secs_f64(self.initial_backoff.as_secs_f64() * multiplier)
        } else {
            self.initial_backoff
        };

        let capped_backoff = base_backoff.min(self.max_backoff);

        if self.jitter_factor == 0.0 {
            return capped_backoff;
        }

        let jitter = capped_backoff.as_secs_f64() * self.jitter_factor * rand::random::<f64>();
        let with_jitter = Duration::from_secs_f64(capped_backoff.as_secs_f64() + jitter);

        debug!(
            "Calculated backoff for attempt {}: {:?} (base: {:?})",
            attempt, with_jitter, base_backoff
        );

        with_jitter
    }

    /// Check if another retry is allowed after `attempt` retries
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_retries {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// Whether the policy ever gives up
    pub fn is_bounded(&self) -> bool {
        self.max_retries.is_some()
    }

    /// Total attempts allowed, `None` for unbounded
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_retries.map(|retries| retries + 1)
    }
}

/// Retry result
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Success after retries
    Success { value: T, attempts: u32 },
    /// Failed after exhausting retries
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    /// Number of retries performed before the final outcome
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. } | RetryResult::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute a function with retry logic.
    ///
    /// `on_failure` runs after every failed attempt that will be retried,
    /// before the backoff sleep; callers use it to drop broken connections.
    pub async fn execute<F, Fut, H, HFut, T, E>(
        &self,
        mut operation: F,
        mut on_failure: H,
    ) -> RetryResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        H: FnMut(&E, u32) -> HFut,
        HFut: std::future::Future<Output = ()>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return RetryResult::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    if !self.policy.should_retry(attempt) {
                        warn!("Operation failed after {} attempts: {}", attempt + 1, error);
                        return RetryResult::Failed {
                            error,
                            attempts: attempt,
                        };
                    }

                    on_failure(&error, attempt).await;

                    attempt += 1;
                    let backoff = self.policy.next_backoff(attempt);

                    warn!(
                        "Operation failed (attempt {}), retrying in {:?}: {}",
                        attempt, backoff, error
                    );

                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
