//! Step execution: replay guard, invocation, failure classification.

use crate::clock::Clock;
use crate::context::StepContext;
use crate::definition::StepFn;
use crate::error::{StepError, WorkflowError};
use crate::run::{OperationRecord, StepOutcome, WorkflowRun};
use crate::step::{RetryDecision, RetryPolicy, StepConfig, StepName};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// What the executor decided for one step operation.
///
/// Every variant that records progress corresponds to exactly one
/// [`OperationRecord`] write on the run.
#[derive(Debug)]
pub(crate) enum StepDisposition {
    /// The step's success is recorded (freshly or by replay); advance.
    Completed,
    /// A retry is now scheduled; commit and yield until its wake time.
    RetryScheduled,
    /// An earlier retry is scheduled but not yet due; nothing was written.
    WaitingForRetry,
    /// The step failed terminally and the run must fail.
    Failed {
        /// The recorded failure reason
        message: String,
    },
}

/// Runs (or replays) the step at `index`, writing at most one record.
///
/// A recorded success short-circuits without invoking the function, which
/// is what makes side-effecting steps safe to drive repeatedly across
/// crashes and duplicate triggers.
pub(crate) async fn execute_step(
    run: &mut WorkflowRun,
    index: u32,
    name: &StepName,
    func: &StepFn,
    config: &StepConfig,
    default_retry: &RetryPolicy,
    clock: &dyn Clock,
) -> Result<StepDisposition, WorkflowError> {
    let attempts_made = match run.record(index) {
        Some(OperationRecord::Step {
            outcome: StepOutcome::Succeeded(_),
            ..
        }) => {
            debug!(run_id = %run.id, step = %name, index, "replaying recorded step outcome");
            return Ok(StepDisposition::Completed);
        }
        Some(OperationRecord::Step {
            outcome: StepOutcome::Failed { message, .. },
            ..
        }) => {
            // Already terminally failed at this index; the run should not
            // have been advanced to here again.
            return Ok(StepDisposition::Failed {
                message: message.clone(),
            });
        }
        Some(OperationRecord::Step {
            outcome: StepOutcome::AwaitingRetry { next_attempt_at },
            attempts,
            ..
        }) => {
            if clock.now() < *next_attempt_at {
                return Ok(StepDisposition::WaitingForRetry);
            }
            *attempts
        }
        Some(OperationRecord::Sleep { .. }) => {
            return Err(WorkflowError::Configuration(format!(
                "run {}: operation {index} is recorded as a sleep but the definition has step '{name}'",
                run.id
            )));
        }
        None => 0,
    };

    let attempt = attempts_made + 1;
    let ctx = StepContext::new(
        run.id,
        run.workflow.clone(),
        run.input.clone(),
        run.step_outputs(),
        attempt,
    );

    let result = invoke(func, ctx, config, name).await;

    match result {
        Ok(value) => {
            info!(run_id = %run.id, step = %name, attempt, "step completed");
            run.put_record(OperationRecord::Step {
                index,
                name: name.clone(),
                attempts: attempt,
                outcome: StepOutcome::Succeeded(value),
            })?;
            Ok(StepDisposition::Completed)
        }
        Err(error) if error.is_fatal() => {
            warn!(run_id = %run.id, step = %name, attempt, %error, "step failed fatally");
            let message = format!("step '{name}' failed fatally: {error}");
            run.put_record(OperationRecord::Step {
                index,
                name: name.clone(),
                attempts: attempt,
                outcome: StepOutcome::Failed {
                    message: message.clone(),
                    fatal: true,
                },
            })?;
            Ok(StepDisposition::Failed { message })
        }
        Err(error) => {
            let policy = config.retry_policy.as_ref().unwrap_or(default_retry);
            match policy.decide(attempt) {
                RetryDecision::RetryAfter(delay) => {
                    let next_attempt_at = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|delta| clock.now().checked_add_signed(delta))
                        .ok_or_else(|| {
                            WorkflowError::Configuration(format!(
                                "retry delay {delay:?} puts the next attempt time out of range"
                            ))
                        })?;
                    warn!(
                        run_id = %run.id, step = %name, attempt, %error,
                        retry_in = ?delay, "step failed, retry scheduled"
                    );
                    run.put_record(OperationRecord::Step {
                        index,
                        name: name.clone(),
                        attempts: attempt,
                        outcome: StepOutcome::AwaitingRetry { next_attempt_at },
                    })?;
                    Ok(StepDisposition::RetryScheduled)
                }
                RetryDecision::GiveUp => {
                    warn!(run_id = %run.id, step = %name, attempt, %error, "retries exhausted");
                    let message =
                        format!("step '{name}' exhausted retries after {attempt} attempts: {error}");
                    run.put_record(OperationRecord::Step {
                        index,
                        name: name.clone(),
                        attempts: attempt,
                        outcome: StepOutcome::Failed {
                            message: message.clone(),
                            fatal: false,
                        },
                    })?;
                    Ok(StepDisposition::Failed { message })
                }
            }
        }
    }
}

async fn invoke(
    func: &StepFn,
    ctx: StepContext,
    config: &StepConfig,
    name: &StepName,
) -> Result<serde_json::Value, StepError> {
    let fut = func(ctx);
    match config.timeout {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => result,
            // Timeouts are transient by classification; the retry policy
            // decides how often to keep trying.
            Err(_) => Err(StepError::retryable(format!(
                "step '{name}' timed out after {limit:?}"
            ))),
        },
        None => fut.await,
    }
}
