use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tsuzuri::prelude::*;
use tsuzuri::{StepError, WorkflowError};

/// Per-step invocation counters for the signup workflow.
#[derive(Clone, Default)]
struct SignupCalls {
    create: Arc<AtomicU32>,
    welcome: Arc<AtomicU32>,
    onboarding: Arc<AtomicU32>,
}

/// The user-signup workflow: create the user, send a welcome email that
/// fails retryably for the first `welcome_failures` invocations, sleep 5s,
/// then send an onboarding email that is fatal for addresses without '@'.
fn signup_definition(calls: &SignupCalls, welcome_failures: u32) -> WorkflowDefinition {
    let create = calls.create.clone();
    let welcome = calls.welcome.clone();
    let onboarding = calls.onboarding.clone();

    WorkflowDefinition::builder("user-signup")
        .step("create-user", move |ctx| {
            let create = create.clone();
            async move {
                create.fetch_add(1, Ordering::SeqCst);
                let email: String = ctx.input_as()?;
                Ok(json!({ "id": "user-1", "email": email }))
            }
        })
        .step("welcome-email", move |_ctx| {
            let welcome = welcome.clone();
            async move {
                let call = welcome.fetch_add(1, Ordering::SeqCst);
                if call < welcome_failures {
                    return Err(StepError::retryable("network error"));
                }
                Ok(json!("sent"))
            }
        })
        .sleep("5s")
        .step("onboarding-email", move |ctx| {
            let onboarding = onboarding.clone();
            async move {
                onboarding.fetch_add(1, Ordering::SeqCst);
                let user: Value = ctx.output_as("create-user")?;
                let email = user["email"].as_str().unwrap_or_default();
                if !email.contains('@') {
                    return Err(StepError::fatal("invalid email address"));
                }
                Ok(json!("sent"))
            }
        })
        .finish(|ctx| {
            let user_id = ctx
                .output("create-user")
                .and_then(|user| user.get("id"))
                .cloned()
                .unwrap_or_default();
            json!({ "userId": user_id, "status": "onboarded" })
        })
        .build()
        .expect("valid definition")
}

fn signup_engine(calls: &SignupCalls, welcome_failures: u32) -> (Arc<Engine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let engine = Engine::builder()
        .workflow(signup_definition(calls, welcome_failures))
        .clock(clock.clone())
        .retry_policy(RetryPolicy::fixed(3, Duration::from_secs(1)))
        .build()
        .expect("valid engine");
    (Arc::new(engine), clock)
}

/// Waits for the asynchronously started run to settle into a state matching
/// the predicate.
async fn wait_for(
    engine: &Engine,
    run_id: RunId,
    predicate: impl Fn(&WorkflowRun) -> bool,
) -> WorkflowRun {
    for _ in 0..500 {
        let run = engine.run_state(run_id).await.expect("run exists");
        if predicate(&run) {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("run {run_id} never reached the expected state");
}

#[tokio::test]
async fn test_user_signup_happy_path() {
    let calls = SignupCalls::default();
    let (engine, clock) = signup_engine(&calls, 1);

    let run_id = engine
        .start("user-signup", json!("a@b.com"))
        .await
        .expect("workflow registered");

    // The welcome email fails once; the run settles waiting for its retry.
    wait_for(&engine, run_id, |run| run.pending_wake().is_some()).await;
    assert_eq!(calls.create.load(Ordering::SeqCst), 1);
    assert_eq!(calls.welcome.load(Ordering::SeqCst), 1);

    // Past the backoff delay the retry succeeds and the run goes to sleep.
    clock.advance(Duration::from_secs(2));
    assert_eq!(engine.wake_due().await.unwrap(), 1);
    let run = engine.run_state(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Sleeping);
    assert_eq!(calls.welcome.load(Ordering::SeqCst), 2);
    assert_eq!(calls.onboarding.load(Ordering::SeqCst), 0);

    // Less than the 5s sleep: nothing is due.
    clock.advance(Duration::from_secs(4));
    assert_eq!(engine.wake_due().await.unwrap(), 0);
    assert_eq!(
        engine.run_state(run_id).await.unwrap().status,
        RunStatus::Sleeping
    );

    // Past the deadline the run resumes and completes.
    clock.advance(Duration::from_secs(2));
    assert_eq!(engine.wake_due().await.unwrap(), 1);
    let run = engine.run_state(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(
        run.output,
        Some(json!({ "userId": "user-1", "status": "onboarded" }))
    );

    // Exactly two attempts recorded for the welcome email, one for the rest.
    assert_eq!(run.attempts_at(0), 1);
    assert_eq!(run.attempts_at(1), 2);
    assert_eq!(run.attempts_at(3), 1);
    assert_eq!(calls.onboarding.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_user_signup_invalid_email_is_fatal() {
    let calls = SignupCalls::default();
    // Welcome email succeeds first try so the run reaches the fatal step.
    let (engine, clock) = signup_engine(&calls, 0);

    let run_id = engine
        .start("user-signup", json!("bad-email"))
        .await
        .expect("workflow registered");

    wait_for(&engine, run_id, |run| run.status == RunStatus::Sleeping).await;
    clock.advance(Duration::from_secs(6));
    assert_eq!(engine.wake_due().await.unwrap(), 1);

    let run = engine.run_state(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run
        .failure
        .as_deref()
        .is_some_and(|f| f.contains("invalid email address")));

    // Fatal short-circuit: one attempt on the onboarding step, despite the
    // engine's retry budget.
    assert_eq!(run.attempts_at(3), 1);
    assert_eq!(calls.onboarding.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completed_steps_never_reinvoked_on_retrigger() {
    let calls = SignupCalls::default();
    let (engine, clock) = signup_engine(&calls, 0);

    let run_id = engine
        .start("user-signup", json!("a@b.com"))
        .await
        .expect("workflow registered");

    wait_for(&engine, run_id, |run| run.status == RunStatus::Sleeping).await;
    clock.advance(Duration::from_secs(6));
    engine.wake_due().await.unwrap();
    let completed = engine.run_state(run_id).await.unwrap();
    assert_eq!(completed.status, RunStatus::Succeeded);

    // Re-trigger the orchestrator many times; nothing may change.
    for _ in 0..10 {
        let status = engine.advance(run_id).await.unwrap();
        assert_eq!(status, RunStatus::Succeeded);
    }
    assert_eq!(engine.run_state(run_id).await.unwrap(), completed);
    assert_eq!(calls.create.load(Ordering::SeqCst), 1);
    assert_eq!(calls.welcome.load(Ordering::SeqCst), 1);
    assert_eq!(calls.onboarding.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_exhaustion_reaches_failed() {
    let attempts = Arc::new(AtomicU32::new(0));
    let step_attempts = attempts.clone();
    let definition = WorkflowDefinition::builder("always-down")
        .step("flaky", move |_ctx| {
            let attempts = step_attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(StepError::retryable("still down"))
            }
        })
        .build()
        .expect("valid definition");

    let clock = Arc::new(ManualClock::default());
    let engine = Arc::new(
        Engine::builder()
            .workflow(definition)
            .clock(clock.clone())
            .retry_policy(RetryPolicy::fixed(2, Duration::from_secs(1)))
            .build()
            .expect("valid engine"),
    );

    let run_id = engine
        .start("always-down", json!({}))
        .await
        .expect("workflow registered");

    // Drive through the bounded retry schedule to exhaustion.
    let run = loop {
        let run = wait_for(&engine, run_id, |run| {
            run.status.is_terminal() || run.pending_wake().is_some()
        })
        .await;
        if run.status.is_terminal() {
            break run;
        }
        clock.advance(Duration::from_secs(2));
        engine.wake_due().await.unwrap();
    };

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run
        .failure
        .as_deref()
        .is_some_and(|f| f.contains("exhausted retries")));
    // 1 initial attempt + 2 retries, never more.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(run.attempts_at(0), 3);
}

#[tokio::test]
async fn test_unregistered_workflow_and_unknown_run() {
    let calls = SignupCalls::default();
    let (engine, _clock) = signup_engine(&calls, 0);

    let unknown = engine.start("no-such-workflow", json!({})).await;
    assert!(matches!(unknown, Err(WorkflowError::WorkflowNotFound(_))));

    let missing = engine.run_state(RunId::new()).await;
    assert!(matches!(missing, Err(WorkflowError::RunNotFound(_))));
}
