//! The execution state store: the only shared mutable resource in the engine.

use crate::error::WorkflowError;
use crate::run::{RunId, WorkflowRun};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Durable storage for workflow runs.
///
/// All engine components communicate exclusively by reading and writing run
/// records here. Implementations must provide atomic, isolated
/// read-modify-write per run: [`RunStore::update`] is a compare-and-set on
/// the run's `revision`, so concurrent advance triggers for the same run
/// resolve to exactly one committed writer per operation.
///
/// [`WorkflowRun`] is fully serde-serializable, so persistent backends can
/// store it as a document keyed by run identifier.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a brand-new run record.
    async fn create(&self, run: WorkflowRun) -> Result<(), WorkflowError>;

    /// Loads the current record for a run.
    async fn load(&self, id: RunId) -> Result<WorkflowRun, WorkflowError>;

    /// Commits an updated run record if nobody else has in the meantime.
    ///
    /// Succeeds only when the stored revision matches `run.revision`; the
    /// committed record (with its bumped revision) is returned. A mismatch
    /// yields [`WorkflowError::Conflict`], meaning a concurrent invocation
    /// already advanced this run.
    async fn update(&self, run: WorkflowRun) -> Result<WorkflowRun, WorkflowError>;

    /// Identifiers of non-terminal runs whose pending wake time has arrived.
    async fn due_runs(&self, now: DateTime<Utc>) -> Result<Vec<RunId>, WorkflowError>;
}

/// In-process [`RunStore`] backed by a mutex-guarded map.
///
/// The default backend for tests, demos, and single-process deployments;
/// anything durable across process death implements the same trait against
/// real storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<RunId, WorkflowRun>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs currently held.
    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Whether the store holds no runs.
    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create(&self, run: WorkflowRun) -> Result<(), WorkflowError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&run.id) {
            return Err(WorkflowError::Conflict { run_id: run.id });
        }
        runs.insert(run.id, run);
        Ok(())
    }

    async fn load(&self, id: RunId) -> Result<WorkflowRun, WorkflowError> {
        let runs = self.runs.lock().await;
        runs.get(&id)
            .cloned()
            .ok_or(WorkflowError::RunNotFound(id))
    }

    async fn update(&self, mut run: WorkflowRun) -> Result<WorkflowRun, WorkflowError> {
        let mut runs = self.runs.lock().await;
        let stored = runs
            .get(&run.id)
            .ok_or(WorkflowError::RunNotFound(run.id))?;
        if stored.revision != run.revision {
            return Err(WorkflowError::Conflict { run_id: run.id });
        }
        run.revision += 1;
        runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn due_runs(&self, now: DateTime<Utc>) -> Result<Vec<RunId>, WorkflowError> {
        let runs = self.runs.lock().await;
        Ok(runs
            .values()
            .filter(|run| matches!(run.pending_wake(), Some(wake_at) if wake_at <= now))
            .map(|run| run.id)
            .collect())
    }
}
