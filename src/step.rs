use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Type-safe step name wrapper.
///
/// Provides compile-time safety for step identifiers, preventing
/// typos and mismatched step names at the API level. Step names are
/// persisted in operation records, so they are serde-capable.
///
/// # Examples
///
/// ```
/// use tsuzuri::StepName;
///
/// let name = StepName::new("create-user");
/// assert_eq!(name.as_str(), "create-user");
///
/// // From trait for ergonomic conversion
/// let name: StepName = "send-welcome-email".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Retry policy for step execution.
///
/// Defines how a step should be retried when it fails retryably. Supports
/// no retry, fixed delay, and exponential backoff strategies. Fatal
/// failures bypass the policy entirely.
///
/// # Examples
///
/// ```
/// use tsuzuri::RetryPolicy;
/// use std::time::Duration;
///
/// // No retry
/// let policy = RetryPolicy::None;
///
/// // Fixed delay: retry 3 times with 1 second delay
/// let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
///
/// // Exponential backoff: retry 5 times starting at 100ms
/// let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// No retry - fail immediately on error.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Delay between each retry
        delay: Duration,
    },
    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Initial delay before first retry
        initial_delay: Duration,
        /// Maximum delay cap
        max_delay: Duration,
        /// Multiplier for each retry (e.g., 2 doubles the delay)
        multiplier: u32,
    },
}

/// The engine's verdict after a retryable failure.
///
/// Produced by [`RetryPolicy::decide`] from the number of attempts already
/// made. Exhaustion converts a retryable failure into a terminal one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-attempt the step after the given delay.
    RetryAfter(Duration),
    /// The attempt budget is spent; fail the run.
    GiveUp,
}

/// Error returned when [`RetryPolicy`] configuration is invalid.
///
/// This error is returned by [`RetryPolicy::exponential_backoff`] when
/// the provided parameters are invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyError(pub &'static str);

impl std::fmt::Display for RetryPolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryPolicyError {}

impl RetryPolicy {
    /// Creates a fixed retry policy.
    ///
    /// Retries the step up to `max_retries` times with a constant `delay`
    /// between each attempt.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates an exponential backoff retry policy with default settings.
    ///
    /// Uses `multiplier=2` and `max_delay=60s`. The delay doubles after
    /// each attempt until reaching the maximum.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsuzuri::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
    ///
    /// // Delays: 100ms, 200ms, 400ms, 800ms, 1600ms
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(200)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
    /// ```
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff retry policy with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if:
    /// - `multiplier` is 0 (would result in no backoff)
    /// - `multiplier` is greater than 10 (risk of overflow)
    /// - `max_delay` is less than `initial_delay`
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(RetryPolicyError(
                "multiplier must be 10 or less to avoid overflow",
            ));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Returns the maximum number of retries for this policy.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Calculates the delay for the given retry attempt.
    ///
    /// Attempt numbers are 0-indexed (first retry is attempt 0).
    ///
    /// # Returns
    ///
    /// - `None` for `RetryPolicy::None`
    /// - `Some(delay)` for other policies
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let delay = initial_delay.as_millis() as u64 * (*multiplier as u64).pow(attempt);
                Some(Duration::from_millis(
                    delay.min(max_delay.as_millis() as u64),
                ))
            }
        }
    }

    /// Decides whether a step that has already failed `attempts_made` times
    /// gets another attempt, and after what delay.
    ///
    /// `attempts_made` counts completed invocations, so it is at least 1
    /// when this is called. A step is allowed `1 + max_retries` invocations
    /// in total.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsuzuri::{RetryDecision, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::fixed(2, Duration::from_secs(1));
    ///
    /// assert_eq!(
    ///     policy.decide(1),
    ///     RetryDecision::RetryAfter(Duration::from_secs(1))
    /// );
    /// assert_eq!(policy.decide(3), RetryDecision::GiveUp);
    /// assert_eq!(RetryPolicy::None.decide(1), RetryDecision::GiveUp);
    /// ```
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made > self.max_retries() {
            return RetryDecision::GiveUp;
        }
        match self.delay_for_attempt(attempts_made.saturating_sub(1)) {
            Some(delay) => RetryDecision::RetryAfter(delay),
            None => RetryDecision::GiveUp,
        }
    }
}

/// Per-step configuration.
///
/// Controls timeout and retry behavior for one step. A `retry_policy` of
/// `None` defers to the engine's default policy.
///
/// # Examples
///
/// ```
/// use tsuzuri::{RetryPolicy, StepConfig};
/// use std::time::Duration;
///
/// let config = StepConfig {
///     timeout: Some(Duration::from_secs(60)),
///     retry_policy: Some(RetryPolicy::fixed(3, Duration::from_secs(1))),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct StepConfig {
    /// Maximum time allowed for step execution. `None` means no timeout.
    /// Default: 30 seconds. A timed-out attempt counts as a retryable
    /// failure.
    pub timeout: Option<Duration>,
    /// Retry policy override for this step. `None` uses the engine default.
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retry_policy: None,
        }
    }
}
