use crate::definition::WorkflowName;
use crate::run::RunId;
use thiserror::Error;

/// A failure raised by a step function.
///
/// Step authors classify their own failures: [`StepError::retryable`] for
/// transient conditions the engine should attempt again, and
/// [`StepError::fatal`] for permanent conditions that must terminate the run
/// immediately. Any failure not explicitly marked fatal is treated as
/// retryable.
///
/// # Examples
///
/// ```
/// use tsuzuri::StepError;
///
/// let transient = StepError::retryable("connection reset");
/// assert!(!transient.is_fatal());
///
/// let permanent = StepError::fatal("invalid email address");
/// assert!(permanent.is_fatal());
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
    fatal: bool,
}

impl StepError {
    /// Creates a retryable step failure.
    ///
    /// The engine will re-attempt the step according to its retry policy.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// Creates a fatal step failure.
    ///
    /// The engine will not retry; the run transitions to `Failed`.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    /// Returns `true` if this failure forbids retry.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for StepError {
    // A recorded value that fails to deserialize will not fix itself on a
    // later attempt.
    fn from(err: serde_json::Error) -> Self {
        StepError::fatal(format!("serialization error: {err}"))
    }
}

/// Errors returned by the engine itself.
///
/// These are distinct from [`StepError`]: a `WorkflowError` means the engine
/// could not do what was asked of it (unknown workflow, store conflict,
/// invalid configuration), not that a step's business logic failed.
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code. When matching
/// on this error, always include a wildcard pattern.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// No workflow with this name is registered.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowName),

    /// A workflow with this name is already registered.
    #[error("Workflow already registered: {0}")]
    DuplicateWorkflow(WorkflowName),

    /// No run with this identifier exists in the store.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// A compare-and-set update lost a race with a concurrent advance.
    ///
    /// Callers treat this as benign: another worker already applied the
    /// progress this invocation was about to commit.
    #[error("Run {run_id} was concurrently modified")]
    Conflict {
        /// The run whose update was rejected
        run_id: RunId,
    },

    /// A sleep was scheduled while another timer is still pending.
    ///
    /// A run holds at most one pending timer; hitting this indicates a bug
    /// in the workflow definition or the engine, so it fails fast.
    #[error("Run {run_id} already has a pending timer at operation {index}")]
    TimerAlreadyPending {
        /// The run holding the pending timer
        run_id: RunId,
        /// Index of the operation that owns the timer
        index: u32,
    },

    /// A sleep duration string could not be parsed.
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// A run record or step value failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The workflow definition or engine configuration is invalid.
    ///
    /// Returned by builders when required configuration is missing or
    /// inconsistent.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}
