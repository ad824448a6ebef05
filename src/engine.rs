//! The orchestrator: drives runs forward by replaying records and executing
//! the first operation that has none.

use crate::clock::{Clock, SystemClock};
use crate::context::StepContext;
use crate::definition::{Operation, WorkflowDefinition, WorkflowName};
use crate::error::WorkflowError;
use crate::executor::{execute_step, StepDisposition};
use crate::registry::WorkflowRegistry;
use crate::run::{OperationRecord, RunId, RunStatus, WorkflowRun};
use crate::step::RetryPolicy;
use crate::store::{MemoryStore, RunStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default interval between timer polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::ExponentialBackoff {
        max_retries: 5,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(30),
        multiplier: 2,
    }
}

/// The durable workflow engine: registry, starter, orchestrator, and timer
/// poller in one handle.
///
/// Each run advances through short, independent [`Engine::advance`]
/// invocations; nothing blocks for the duration of a sleep or a retry
/// backoff. All progress is committed to the [`RunStore`] before control is
/// yielded, so a process restart resumes every run exactly where its record
/// says it stopped.
///
/// Advance triggers may be delivered more than once (a duplicate timer
/// fire, a crashed worker's retry); the store's compare-and-set commits
/// guarantee each operation still takes effect exactly once.
pub struct Engine {
    registry: WorkflowRegistry,
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    default_retry: RetryPolicy,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("default_retry", &self.default_retry)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Starts building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Starts a new run of a registered workflow, fire-and-forget.
    ///
    /// Creates and persists the run record, spawns the first advance on the
    /// tokio runtime, and returns the run id immediately. The caller
    /// observes progress through [`Engine::run_state`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::WorkflowNotFound`] if no workflow with this
    /// name is registered.
    pub async fn start(
        self: &Arc<Self>,
        workflow: impl AsRef<str>,
        input: Value,
    ) -> Result<RunId, WorkflowError> {
        let workflow = workflow.as_ref();
        let definition = self
            .registry
            .get(workflow)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(WorkflowName::new(workflow)))?;

        let run = WorkflowRun::new(definition.name().clone(), input, self.clock.now());
        let run_id = run.id;
        self.store.create(run).await?;
        info!(%run_id, workflow, "run started");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = engine.advance(run_id).await {
                warn!(%run_id, %error, "initial advance failed");
            }
        });

        Ok(run_id)
    }

    /// Advances a run as far as it can go right now.
    ///
    /// Replays completed operations from their records, executes the first
    /// pending one, and keeps going until the run finishes, fails, or has
    /// to wait for a wake time. Safe to call at any time, any number of
    /// times: terminal runs are returned untouched and wake times that have
    /// not arrived leave the record unchanged.
    ///
    /// This doubles as the external wake call for sleeping runs.
    pub async fn advance(&self, run_id: RunId) -> Result<RunStatus, WorkflowError> {
        let mut run = self.store.load(run_id).await?;
        if run.status.is_terminal() {
            return Ok(run.status);
        }

        let definition = self
            .registry
            .get(run.workflow.as_str())
            .ok_or_else(|| WorkflowError::WorkflowNotFound(run.workflow.clone()))?;

        loop {
            let cursor = run.replay_cursor();
            let Some(operation) = definition.operation(cursor) else {
                return self.finish_run(run, &definition).await;
            };

            match operation {
                Operation::Step { name, func, config } => {
                    let disposition = execute_step(
                        &mut run,
                        cursor,
                        name,
                        func,
                        config,
                        &self.default_retry,
                        self.clock.as_ref(),
                    )
                    .await?;

                    match disposition {
                        StepDisposition::Completed => match self.commit(run).await? {
                            Committed::Applied(updated) => run = updated,
                            Committed::LostRace(status) => return Ok(status),
                        },
                        StepDisposition::RetryScheduled => {
                            return self.commit_and_yield(run).await;
                        }
                        StepDisposition::WaitingForRetry => {
                            // Nothing was written; nothing to commit.
                            return Ok(run.status);
                        }
                        StepDisposition::Failed { message } => {
                            warn!(run_id = %run.id, reason = %message, "run failed");
                            run.fail(message, self.clock.now());
                            return self.commit_and_yield(run).await;
                        }
                    }
                }
                Operation::Sleep { duration } => match run.record(cursor) {
                    Some(OperationRecord::Sleep {
                        wake_at,
                        completed: false,
                        ..
                    }) => {
                        let wake_at = *wake_at;
                        if self.clock.now() < wake_at {
                            return Ok(RunStatus::Sleeping);
                        }
                        debug!(run_id = %run.id, index = cursor, "sleep elapsed, resuming");
                        run.put_record(OperationRecord::Sleep {
                            index: cursor,
                            wake_at,
                            completed: true,
                        })?;
                        run.status = RunStatus::Running;
                        match self.commit(run).await? {
                            Committed::Applied(updated) => run = updated,
                            Committed::LostRace(status) => return Ok(status),
                        }
                    }
                    Some(record) => {
                        return Err(WorkflowError::Configuration(format!(
                            "run {}: operation {cursor} is a sleep in the definition but recorded as {record:?}",
                            run.id
                        )));
                    }
                    None => {
                        if run.pending_wake().is_some() {
                            return Err(WorkflowError::TimerAlreadyPending {
                                run_id: run.id,
                                index: cursor,
                            });
                        }
                        let wake_at = chrono::Duration::from_std(*duration)
                            .ok()
                            .and_then(|delta| self.clock.now().checked_add_signed(delta))
                            .ok_or_else(|| {
                                WorkflowError::InvalidDuration(format!(
                                    "sleep of {duration:?} puts the wake time out of range"
                                ))
                            })?;
                        info!(run_id = %run.id, index = cursor, %wake_at, "run sleeping");
                        run.put_record(OperationRecord::Sleep {
                            index: cursor,
                            wake_at,
                            completed: false,
                        })?;
                        run.status = RunStatus::Sleeping;
                        return self.commit_and_yield(run).await;
                    }
                },
            }
        }
    }

    /// Advances every run whose wake time has arrived.
    ///
    /// Returns the number of due runs found. The timer loop calls this on
    /// an interval; it can also be called directly after advancing a test
    /// clock.
    pub async fn wake_due(&self) -> Result<usize, WorkflowError> {
        let due = self.store.due_runs(self.clock.now()).await?;
        let count = due.len();
        for run_id in due {
            if let Err(error) = self.advance(run_id).await {
                warn!(%run_id, %error, "failed to advance due run");
            }
        }
        Ok(count)
    }

    /// Spawns the background timer poller.
    ///
    /// Polls [`Engine::wake_due`] every `poll_interval` until the returned
    /// handle is aborted or the runtime shuts down.
    pub fn spawn_timer_loop(self: &Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(error) = engine.wake_due().await {
                    warn!(%error, "timer poll failed");
                }
            }
        })
    }

    /// Cancels a run: terminal immediately, pending timers and all.
    ///
    /// A step side effect already dispatched is not aborted; the engine
    /// just never advances the run again. Cancelling an already-terminal
    /// run is a no-op.
    pub async fn cancel(&self, run_id: RunId) -> Result<(), WorkflowError> {
        loop {
            let mut run = self.store.load(run_id).await?;
            if run.status.is_terminal() {
                return Ok(());
            }
            run.cancel(self.clock.now());
            match self.store.update(run).await {
                Ok(_) => {
                    info!(%run_id, "run cancelled");
                    return Ok(());
                }
                Err(WorkflowError::Conflict { .. }) => continue,
                Err(error) => return Err(error),
            }
        }
    }

    /// The current persisted state of a run: the status/result query.
    pub async fn run_state(&self, run_id: RunId) -> Result<WorkflowRun, WorkflowError> {
        self.store.load(run_id).await
    }

    async fn finish_run(
        &self,
        mut run: WorkflowRun,
        definition: &WorkflowDefinition,
    ) -> Result<RunStatus, WorkflowError> {
        let ctx = StepContext::new(
            run.id,
            run.workflow.clone(),
            run.input.clone(),
            run.step_outputs(),
            0,
        );
        let output = definition.finish_value(&ctx);
        info!(run_id = %run.id, "run succeeded");
        run.complete(output, self.clock.now());
        self.commit_and_yield(run).await
    }

    async fn commit(&self, run: WorkflowRun) -> Result<Committed, WorkflowError> {
        let run_id = run.id;
        match self.store.update(run).await {
            Ok(updated) => Ok(Committed::Applied(updated)),
            Err(WorkflowError::Conflict { .. }) => {
                debug!(%run_id, "lost commit race to a concurrent advance");
                let current = self.store.load(run_id).await?;
                Ok(Committed::LostRace(current.status))
            }
            Err(error) => Err(error),
        }
    }

    async fn commit_and_yield(&self, run: WorkflowRun) -> Result<RunStatus, WorkflowError> {
        let status = run.status;
        match self.commit(run).await? {
            Committed::Applied(_) => Ok(status),
            Committed::LostRace(current) => Ok(current),
        }
    }
}

enum Committed {
    Applied(WorkflowRun),
    LostRace(RunStatus),
}

/// Builder for [`Engine`].
///
/// Workflow registration is validated at [`EngineBuilder::build`]:
/// duplicate workflow names surface there, not at the `workflow` call.
pub struct EngineBuilder {
    definitions: Vec<WorkflowDefinition>,
    store: Option<Arc<dyn RunStore>>,
    clock: Option<Arc<dyn Clock>>,
    default_retry: Option<RetryPolicy>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
            store: None,
            clock: None,
            default_retry: None,
        }
    }

    /// Adds a workflow definition to register.
    pub fn workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Sets the run store. Defaults to an in-process [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the engine-wide default retry policy.
    ///
    /// Defaults to exponential backoff: 5 retries, 100ms initial delay,
    /// 30s cap, doubling per attempt.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    /// Validates registrations and assembles the engine.
    pub fn build(self) -> Result<Engine, WorkflowError> {
        let mut registry = WorkflowRegistry::new();
        for definition in self.definitions {
            registry.register(definition)?;
        }
        Ok(Engine {
            registry,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            default_retry: self.default_retry.unwrap_or_else(default_retry_policy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StepError;
    use serde_json::json;

    fn two_step_definition() -> WorkflowDefinition {
        WorkflowDefinition::builder("pipeline")
            .step("first", |_ctx| async move { Ok(json!("one")) })
            .step("second", |ctx| async move {
                let first: String = ctx.output_as("first")?;
                Ok(json!(format!("{first}-two")))
            })
            .finish(|ctx| ctx.output("second").cloned().unwrap_or_default())
            .build()
            .expect("valid definition")
    }

    fn engine_with(definition: WorkflowDefinition, clock: Arc<ManualClock>) -> Arc<Engine> {
        let engine = Engine::builder()
            .workflow(definition)
            .clock(clock)
            .build()
            .expect("valid engine");
        Arc::new(engine)
    }

    /// Waits for the run (driven by the advance spawned at start) to settle
    /// into a state matching the predicate.
    async fn wait_for(
        engine: &Engine,
        run_id: RunId,
        predicate: impl Fn(RunStatus) -> bool,
    ) -> WorkflowRun {
        for _ in 0..500 {
            let run = engine.run_state(run_id).await.expect("run exists");
            if predicate(run.status) {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("run {run_id} never reached the expected status");
    }

    #[tokio::test]
    async fn test_start_unknown_workflow_fails() {
        let engine = engine_with(two_step_definition(), Arc::new(ManualClock::default()));
        let result = engine.start("missing", json!({})).await;
        assert!(matches!(result, Err(WorkflowError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let engine = engine_with(two_step_definition(), Arc::new(ManualClock::default()));
        let run_id = engine.start("pipeline", json!({})).await.unwrap();

        let run = wait_for(&engine, run_id, |s| s == RunStatus::Succeeded).await;
        assert_eq!(run.output, Some(json!("one-two")));
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_advance_is_idempotent_on_terminal_runs() {
        let engine = engine_with(two_step_definition(), Arc::new(ManualClock::default()));
        let run_id = engine.start("pipeline", json!({})).await.unwrap();

        let before = wait_for(&engine, run_id, |s| s.is_terminal()).await;
        for _ in 0..5 {
            let status = engine.advance(run_id).await.unwrap();
            assert_eq!(status, RunStatus::Succeeded);
        }
        let after = engine.run_state(run_id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_sleep_suspends_and_wakes() {
        let clock = Arc::new(ManualClock::default());
        let definition = WorkflowDefinition::builder("nap")
            .step("before", |_ctx| async move { Ok(json!("ok")) })
            .sleep("5s")
            .step("after", |_ctx| async move { Ok(json!("done")) })
            .finish(|ctx| ctx.output("after").cloned().unwrap_or_default())
            .build()
            .expect("valid definition");
        let engine = engine_with(definition, clock.clone());

        let run_id = engine.start("nap", json!({})).await.unwrap();
        wait_for(&engine, run_id, |s| s == RunStatus::Sleeping).await;

        // Not due yet.
        clock.advance(Duration::from_secs(3));
        assert_eq!(engine.wake_due().await.unwrap(), 0);
        assert_eq!(
            engine.run_state(run_id).await.unwrap().status,
            RunStatus::Sleeping
        );

        // Past the deadline the poller resumes and completes the run.
        clock.advance(Duration::from_secs(3));
        assert_eq!(engine.wake_due().await.unwrap(), 1);
        let run = engine.run_state(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.output, Some(json!("done")));
    }

    #[tokio::test]
    async fn test_fatal_step_fails_run() {
        let definition = WorkflowDefinition::builder("doomed")
            .step("explode", |_ctx| async move {
                Err::<Value, _>(StepError::fatal("invalid input"))
            })
            .build()
            .expect("valid definition");
        let engine = engine_with(definition, Arc::new(ManualClock::default()));

        let run_id = engine.start("doomed", json!({})).await.unwrap();
        let run = wait_for(&engine, run_id, |s| s == RunStatus::Failed).await;

        assert_eq!(run.attempts_at(0), 1);
        assert!(run
            .failure
            .as_deref()
            .is_some_and(|f| f.contains("invalid input")));
    }

    #[tokio::test]
    async fn test_cancel_stops_sleeping_run() {
        let clock = Arc::new(ManualClock::default());
        let definition = WorkflowDefinition::builder("nap")
            .step("before", |_ctx| async move { Ok(json!("ok")) })
            .sleep("1h")
            .step("after", |_ctx| async move { Ok(json!("done")) })
            .build()
            .expect("valid definition");
        let engine = engine_with(definition, clock.clone());

        let run_id = engine.start("nap", json!({})).await.unwrap();
        wait_for(&engine, run_id, |s| s == RunStatus::Sleeping).await;

        engine.cancel(run_id).await.unwrap();
        let run = engine.run_state(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        // The elapsed timer never revives a cancelled run.
        clock.advance(Duration::from_secs(7200));
        assert_eq!(engine.wake_due().await.unwrap(), 0);
        assert_eq!(
            engine.run_state(run_id).await.unwrap().status,
            RunStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_unrepresentable_sleep_fails_advance_without_panic() {
        // Parses fine as seconds but overflows chrono's datetime range when
        // added to the current time.
        let definition = WorkflowDefinition::builder("deep-sleep")
            .step("before", |_ctx| async move { Ok(json!("ok")) })
            .sleep("9000000000000000000s")
            .build()
            .expect("valid definition");

        let store = Arc::new(MemoryStore::new());
        let engine = Engine::builder()
            .workflow(definition)
            .store(store.clone())
            .clock(Arc::new(ManualClock::default()))
            .build()
            .expect("valid engine");

        // Seed the run directly so the advance is driven synchronously.
        let run = WorkflowRun::new(
            crate::definition::WorkflowName::new("deep-sleep"),
            json!({}),
            chrono::Utc::now(),
        );
        let run_id = run.id;
        store.create(run).await.unwrap();

        let result = engine.advance(run_id).await;
        assert!(matches!(result, Err(WorkflowError::InvalidDuration(_))));

        // The step before the sleep committed; the sleep was never recorded.
        let run = engine.run_state(run_id).await.unwrap();
        assert_eq!(run.replay_cursor(), 1);
        assert_eq!(run.record(1), None);
    }

    #[tokio::test]
    async fn test_duplicate_workflow_rejected_at_build() {
        let result = Engine::builder()
            .workflow(two_step_definition())
            .workflow(two_step_definition())
            .build();
        assert!(matches!(result, Err(WorkflowError::DuplicateWorkflow(_))));
    }
}
