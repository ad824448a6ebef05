//! # Tsuzuri (綴)
//!
//! A durable workflow engine for Rust.
//!
//! The name "Tsuzuri" (綴) means "to bind together" in Japanese,
//! representing how this engine binds a workflow's steps into a durable
//! record that survives crashes, retries, and long sleeps.
//!
//! ## Features
//!
//! - **Durable execution**: every completed operation is committed to a
//!   [`RunStore`] before the engine yields, so runs resume exactly where
//!   they left off after a process restart
//! - **Replay, not re-execution**: a step whose success is recorded is never
//!   invoked again; its recorded output feeds later steps
//! - **Failure classification**: step authors mark failures retryable
//!   (default) or fatal; the engine owns backoff and attempt budgets
//! - **Durable sleep**: `sleep("5s")` persists an absolute wake time and
//!   releases the worker; no task or thread is held for the duration
//! - **Type-safe**: [`StepName`], [`WorkflowName`], and [`RunId`] newtypes
//!   prevent identifier mixups at compile time
//! - **Async first**: built on tokio; a run advances through short
//!   independent invocations, never a parked execution stack
//!
//! ## Quick Start
//!
//! ```rust
//! use tsuzuri::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), WorkflowError> {
//! let signup = WorkflowDefinition::builder("user-signup")
//!     .step("create-user", |ctx| async move {
//!         let email: String = ctx.input_as()?;
//!         Ok(json!({ "id": "user-1", "email": email }))
//!     })
//!     .sleep("50ms")
//!     .step("send-welcome", |ctx| async move {
//!         let user: serde_json::Value = ctx.output_as("create-user")?;
//!         Ok(json!(format!("welcome, {}", user["email"])))
//!     })
//!     .finish(|ctx| ctx.output("send-welcome").cloned().unwrap_or_default())
//!     .build()?;
//!
//! let engine = Arc::new(Engine::builder().workflow(signup).build()?);
//! let poller = engine.spawn_timer_loop(Duration::from_millis(10));
//!
//! // Fire-and-forget: the caller gets a run id back immediately.
//! let run_id = engine.start("user-signup", json!("a@b.com")).await?;
//!
//! // Progress is observable through the status query.
//! let run = loop {
//!     let run = engine.run_state(run_id).await?;
//!     if run.status.is_terminal() {
//!         break run;
//!     }
//!     tokio::time::sleep(Duration::from_millis(10)).await;
//! };
//! assert_eq!(run.status, RunStatus::Succeeded);
//! poller.abort();
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Classification
//!
//! Step functions raise [`StepError::retryable`] for transient conditions
//! and [`StepError::fatal`] for permanent ones:
//!
//! ```rust
//! use tsuzuri::{StepError, WorkflowDefinition};
//! use serde_json::json;
//!
//! let definition = WorkflowDefinition::builder("onboarding")
//!     .step("send-email", |ctx| async move {
//!         let email: String = ctx.input_as()?;
//!         if !email.contains('@') {
//!             // Never retried; the run fails immediately.
//!             return Err(StepError::fatal("invalid email address"));
//!         }
//!         Ok(json!("sent"))
//!     })
//!     .build()
//!     .expect("valid definition");
//! # assert_eq!(definition.operations().len(), 1);
//! ```
//!
//! ## Retry Policies
//!
//! The engine default is exponential backoff (5 retries, 100ms initial,
//! 30s cap). Override it engine-wide or per step:
//!
//! ```rust
//! use tsuzuri::{RetryPolicy, StepConfig};
//! use std::time::Duration;
//!
//! let config = StepConfig {
//!     timeout: Some(Duration::from_secs(60)),
//!     retry_policy: Some(RetryPolicy::fixed(3, Duration::from_secs(1))),
//! };
//! # assert_eq!(config.retry_policy.as_ref().map(|p| p.max_retries()), Some(3));
//! ```

mod clock;
mod context;
mod definition;
mod duration;
mod engine;
mod error;
mod executor;
mod registry;
mod run;
mod step;
mod store;

pub mod prelude;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::StepContext;
pub use definition::{
    FinishFn, Operation, StepFn, StepFuture, WorkflowBuilder, WorkflowDefinition, WorkflowName,
};
pub use duration::parse_duration;
pub use engine::{Engine, EngineBuilder, DEFAULT_POLL_INTERVAL};
pub use error::{StepError, WorkflowError};
pub use registry::WorkflowRegistry;
pub use run::{OperationRecord, RunId, RunStatus, StepOutcome, WorkflowRun};
pub use step::{RetryDecision, RetryPolicy, RetryPolicyError, StepConfig, StepName};
pub use store::{MemoryStore, RunStore};
