use crate::context::StepContext;
use crate::duration::parse_duration;
use crate::error::{StepError, WorkflowError};
use crate::step::{StepConfig, StepName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Type-safe workflow name wrapper.
///
/// # Examples
///
/// ```
/// use tsuzuri::WorkflowName;
///
/// let name = WorkflowName::new("user-signup");
/// assert_eq!(name.as_str(), "user-signup");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowName(String);

impl WorkflowName {
    /// Creates a new WorkflowName
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the workflow name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkflowName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkflowName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for WorkflowName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for WorkflowName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Boxed future returned by a step function.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send>>;

/// Type-erased step function stored in a definition.
pub type StepFn = Arc<dyn Fn(StepContext) -> StepFuture + Send + Sync>;

/// Function computing the run's final result from the completed context.
pub type FinishFn = Arc<dyn Fn(&StepContext) -> Value + Send + Sync>;

/// One operation in a workflow definition's ordered sequence.
#[derive(Clone)]
pub enum Operation {
    /// A unit of side-effecting work, replay-safe once recorded.
    Step {
        /// Name identifying the step within the workflow
        name: StepName,
        /// The step's implementation
        func: StepFn,
        /// Timeout and retry override for this step
        config: StepConfig,
    },
    /// A durable pause until a wall-clock deadline.
    Sleep {
        /// How long the run sleeps
        duration: Duration,
    },
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Step { name, config, .. } => f
                .debug_struct("Step")
                .field("name", name)
                .field("config", config)
                .finish_non_exhaustive(),
            Operation::Sleep { duration } => {
                f.debug_struct("Sleep").field("duration", duration).finish()
            }
        }
    }
}

/// An immutable, ordered workflow definition.
///
/// A definition is a sequence of [`Operation`]s terminated by a finish
/// function that computes the run's result from recorded step outputs.
/// Definitions are built once via [`WorkflowDefinition::builder`] and never
/// mutated after registration.
///
/// Replay determinism: the operation sequence is fixed at build time, so a
/// run resuming after a restart walks exactly the same sequence it walked
/// originally. Anything nondeterministic (time, randomness, network) belongs
/// inside a step, where its result is recorded.
///
/// # Examples
///
/// ```
/// use tsuzuri::{StepError, WorkflowDefinition};
/// use serde_json::json;
///
/// let definition = WorkflowDefinition::builder("greet")
///     .step("hello", |_ctx| async move { Ok(json!("hello")) })
///     .sleep("5s")
///     .step("world", |ctx| async move {
///         let greeting: String = ctx.output_as("hello")?;
///         Ok(json!(format!("{greeting}, world")))
///     })
///     .finish(|ctx| ctx.output("world").cloned().unwrap_or_default())
///     .build()
///     .expect("valid definition");
///
/// assert_eq!(definition.name().as_str(), "greet");
/// assert_eq!(definition.operations().len(), 3);
/// ```
pub struct WorkflowDefinition {
    name: WorkflowName,
    operations: Vec<Operation>,
    finish: FinishFn,
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

impl WorkflowDefinition {
    /// Starts building a definition with the given name.
    pub fn builder(name: impl Into<WorkflowName>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// The workflow's registered name.
    pub fn name(&self) -> &WorkflowName {
        &self.name
    }

    /// The ordered operation sequence.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The operation at the given index, if within the sequence.
    pub fn operation(&self, index: u32) -> Option<&Operation> {
        self.operations.get(index as usize)
    }

    /// Computes the run's final result from the completed context.
    pub fn finish_value(&self, ctx: &StepContext) -> Value {
        (self.finish)(ctx)
    }
}

enum BuildOp {
    Step {
        name: StepName,
        func: StepFn,
        config: StepConfig,
    },
    Sleep(String),
}

/// Builder for [`WorkflowDefinition`].
///
/// Validation is deferred to [`WorkflowBuilder::build`]: duplicate step
/// names, unparsable sleep durations, and empty definitions are rejected
/// there.
pub struct WorkflowBuilder {
    name: WorkflowName,
    operations: Vec<BuildOp>,
    finish: Option<FinishFn>,
}

impl WorkflowBuilder {
    fn new(name: impl Into<WorkflowName>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
            finish: None,
        }
    }

    /// Appends a step with the default [`StepConfig`].
    pub fn step<F, Fut>(self, name: impl Into<StepName>, func: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.step_with_config(name, StepConfig::default(), func)
    }

    /// Appends a step with an explicit timeout/retry configuration.
    pub fn step_with_config<F, Fut>(
        mut self,
        name: impl Into<StepName>,
        config: StepConfig,
        func: F,
    ) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        let func: StepFn = Arc::new(move |ctx| Box::pin(func(ctx)) as StepFuture);
        self.operations.push(BuildOp::Step {
            name: name.into(),
            func,
            config,
        });
        self
    }

    /// Appends a durable sleep, given as a human-readable duration string
    /// such as `"5s"` or `"1h"`.
    pub fn sleep(mut self, duration: impl Into<String>) -> Self {
        self.operations.push(BuildOp::Sleep(duration.into()));
        self
    }

    /// Sets the function computing the run's result once all operations
    /// complete. Defaults to `null`.
    pub fn finish<F>(mut self, func: F) -> Self
    where
        F: Fn(&StepContext) -> Value + Send + Sync + 'static,
    {
        self.finish = Some(Arc::new(func));
        self
    }

    /// Validates and assembles the definition.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::Configuration`] if the definition has no
    ///   operations or reuses a step name
    /// - [`WorkflowError::InvalidDuration`] if a sleep string cannot be
    ///   parsed
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        if self.operations.is_empty() {
            return Err(WorkflowError::Configuration(format!(
                "workflow '{}' has no operations",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        let mut operations = Vec::with_capacity(self.operations.len());
        for op in self.operations {
            match op {
                BuildOp::Step { name, func, config } => {
                    if !seen.insert(name.clone()) {
                        return Err(WorkflowError::Configuration(format!(
                            "workflow '{}' declares step '{}' more than once",
                            self.name, name
                        )));
                    }
                    operations.push(Operation::Step { name, func, config });
                }
                BuildOp::Sleep(spec) => {
                    let duration = parse_duration(&spec)?;
                    operations.push(Operation::Sleep { duration });
                }
            }
        }

        Ok(WorkflowDefinition {
            name: self.name,
            operations,
            finish: self.finish.unwrap_or_else(|| Arc::new(|_| Value::Null)),
        })
    }
}
