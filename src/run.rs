//! Durable run records: the state a workflow run persists between advances.

use crate::definition::WorkflowName;
use crate::error::WorkflowError;
use crate::step::StepName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use ulid::Ulid;

/// Unique identifier for a workflow run.
///
/// # Examples
///
/// ```
/// use tsuzuri::RunId;
///
/// let id = RunId::new();
/// let parsed = RunId::parse(&id.to_string()).unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    /// Creates a new random run ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a RunId from its string representation
    pub fn parse(s: &str) -> Result<Self, WorkflowError> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| WorkflowError::Configuration(format!("invalid run ID '{s}': {e}")))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// The run is executing or eligible to execute its next operation
    Running,
    /// The run is suspended on a durable sleep
    Sleeping,
    /// The run completed and recorded its result
    Succeeded,
    /// The run terminated with a recorded failure
    Failed,
    /// The run was cancelled before completing
    Cancelled,
}

impl RunStatus {
    /// Returns `true` once the run can never advance again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Recorded outcome of a step operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// The step completed; its output is fixed for all future replays.
    Succeeded(Value),
    /// The step failed retryably and is waiting for its next attempt.
    AwaitingRetry {
        /// Earliest wall-clock time the next attempt may run
        next_attempt_at: DateTime<Utc>,
    },
    /// The step failed terminally (fatal, or retry budget exhausted).
    Failed {
        /// The recorded failure reason
        message: String,
        /// `true` for an author-marked fatal failure, `false` for exhaustion
        fatal: bool,
    },
}

/// One entry in a run's append-mostly operation log.
///
/// Records are written in definition order with no gaps; only the tail
/// record may be incomplete (a step awaiting retry or a pending sleep).
/// A `Succeeded` step record is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationRecord {
    /// Outcome of a step operation
    Step {
        /// Position in the definition's operation sequence
        index: u32,
        /// Name of the step, for queries and logs
        name: StepName,
        /// Number of invocations performed so far
        attempts: u32,
        /// The recorded outcome
        outcome: StepOutcome,
    },
    /// A scheduled (and possibly elapsed) durable sleep
    Sleep {
        /// Position in the definition's operation sequence
        index: u32,
        /// Absolute wall-clock wake time
        wake_at: DateTime<Utc>,
        /// Whether the wake time has been observed and the run moved on
        completed: bool,
    },
}

impl OperationRecord {
    /// The operation index this record occupies.
    pub fn index(&self) -> u32 {
        match self {
            OperationRecord::Step { index, .. } => *index,
            OperationRecord::Sleep { index, .. } => *index,
        }
    }

    /// Whether this record needs no further work at its index.
    ///
    /// Terminal step failures count as complete: the run ends there, the
    /// cursor never moves past them.
    pub fn is_complete(&self) -> bool {
        match self {
            OperationRecord::Step { outcome, .. } => matches!(
                outcome,
                StepOutcome::Succeeded(_) | StepOutcome::Failed { .. }
            ),
            OperationRecord::Sleep { completed, .. } => *completed,
        }
    }
}

/// The durable record of one workflow execution.
///
/// Owned by the [`RunStore`](crate::store::RunStore) between advances; the
/// orchestrator holds a working copy and commits every mutation back before
/// yielding. The `revision` field carries the compare-and-set token that
/// keeps duplicate advance triggers from double-applying an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier for this run
    pub id: RunId,
    /// Name of the workflow definition being executed
    pub workflow: WorkflowName,
    /// The input the run was started with
    pub input: Value,
    /// Current status
    pub status: RunStatus,
    /// Ordered operation records, a prefix of the definition's sequence
    pub records: Vec<OperationRecord>,
    /// Result value, present once the run succeeds
    pub output: Option<Value>,
    /// Failure reason, present once the run fails
    pub failure: Option<String>,
    /// When the run was started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Compare-and-set revision, bumped by the store on every update
    pub revision: u64,
}

impl WorkflowRun {
    /// Creates a fresh run with an empty operation history.
    pub fn new(workflow: WorkflowName, input: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            workflow,
            input,
            status: RunStatus::Running,
            records: Vec::new(),
            output: None,
            failure: None,
            started_at: now,
            completed_at: None,
            revision: 0,
        }
    }

    /// The first operation index with no completed record, which is where
    /// the orchestrator drives fresh work from.
    pub fn replay_cursor(&self) -> u32 {
        self.records.iter().take_while(|r| r.is_complete()).count() as u32
    }

    /// The record at the given operation index, if written.
    pub fn record(&self, index: u32) -> Option<&OperationRecord> {
        self.records
            .get(index as usize)
            .filter(|r| r.index() == index)
    }

    /// Writes a record at the tail of the log.
    ///
    /// The record either replaces an incomplete tail record at the same
    /// index (a retry bumping its attempt count, a sleep completing) or
    /// appends at the next index. Anything else violates the prefix
    /// invariant and is rejected.
    pub(crate) fn put_record(&mut self, record: OperationRecord) -> Result<(), WorkflowError> {
        let index = record.index() as usize;
        match index.cmp(&self.records.len()) {
            std::cmp::Ordering::Equal => {
                self.records.push(record);
                Ok(())
            }
            std::cmp::Ordering::Less if index == self.records.len() - 1 => {
                if self.records[index].is_complete() {
                    return Err(WorkflowError::Configuration(format!(
                        "run {}: refusing to overwrite completed record at operation {index}",
                        self.id
                    )));
                }
                self.records[index] = record;
                Ok(())
            }
            _ => Err(WorkflowError::Configuration(format!(
                "run {}: out-of-order record write at operation {index}",
                self.id
            ))),
        }
    }

    /// The wall-clock time this run is waiting for, if any.
    ///
    /// Present when the tail record is a pending sleep or a step awaiting
    /// retry. Terminal runs never wait.
    pub fn pending_wake(&self) -> Option<DateTime<Utc>> {
        if self.status.is_terminal() {
            return None;
        }
        match self.records.last()? {
            OperationRecord::Sleep {
                wake_at,
                completed: false,
                ..
            } => Some(*wake_at),
            OperationRecord::Step {
                outcome: StepOutcome::AwaitingRetry { next_attempt_at },
                ..
            } => Some(*next_attempt_at),
            _ => None,
        }
    }

    /// Recorded outputs of all succeeded steps, keyed by step name.
    pub fn step_outputs(&self) -> HashMap<StepName, Value> {
        self.records
            .iter()
            .filter_map(|r| match r {
                OperationRecord::Step {
                    name,
                    outcome: StepOutcome::Succeeded(value),
                    ..
                } => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of invocations already made for the step at `index`.
    pub fn attempts_at(&self, index: u32) -> u32 {
        match self.record(index) {
            Some(OperationRecord::Step { attempts, .. }) => *attempts,
            _ => 0,
        }
    }

    /// Marks the run succeeded with its result value.
    pub(crate) fn complete(&mut self, output: Value, now: DateTime<Utc>) {
        self.status = RunStatus::Succeeded;
        self.output = Some(output);
        self.completed_at = Some(now);
    }

    /// Marks the run failed with the recorded reason.
    pub(crate) fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = RunStatus::Failed;
        self.failure = Some(message.into());
        self.completed_at = Some(now);
    }

    /// Marks the run cancelled.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(now);
    }
}
