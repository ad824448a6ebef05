use crate::definition::WorkflowName;
use crate::error::StepError;
use crate::run::RunId;
use crate::step::StepName;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// Read-only context handed to a step function for one invocation.
///
/// Carries the run identity, the workflow input, and the recorded outputs of
/// every step completed before this one. The context is passed explicitly to
/// each invocation; there is no ambient "current run" state anywhere in the
/// engine.
///
/// During replay the same outputs are reconstructed from the run record, so
/// a step that derives its arguments from `output`/`output_as` sees identical
/// values whether the run is executing for the first time or resuming after
/// a restart.
#[derive(Debug, Clone)]
pub struct StepContext {
    run_id: RunId,
    workflow: WorkflowName,
    input: Value,
    outputs: HashMap<StepName, Value>,
    attempt: u32,
}

impl StepContext {
    pub(crate) fn new(
        run_id: RunId,
        workflow: WorkflowName,
        input: Value,
        outputs: HashMap<StepName, Value>,
        attempt: u32,
    ) -> Self {
        Self {
            run_id,
            workflow,
            input,
            outputs,
            attempt,
        }
    }

    /// The identifier of the run being advanced.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The name of the workflow this run executes.
    pub fn workflow(&self) -> &WorkflowName {
        &self.workflow
    }

    /// The input the run was started with.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Deserializes the run input into a concrete type.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        Ok(serde_json::from_value(self.input.clone())?)
    }

    /// The recorded output of a previously completed step, if any.
    pub fn output(&self, step: impl AsRef<str>) -> Option<&Value> {
        self.outputs.get(step.as_ref())
    }

    /// Deserializes the recorded output of a previously completed step.
    ///
    /// Referencing a step that has not completed is a definition bug, so it
    /// surfaces as a fatal failure rather than a retryable one.
    pub fn output_as<T: DeserializeOwned>(&self, step: impl AsRef<str>) -> Result<T, StepError> {
        let step = step.as_ref();
        let value = self
            .outputs
            .get(step)
            .ok_or_else(|| StepError::fatal(format!("no recorded output for step '{step}'")))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// The 1-based attempt number of the current invocation.
    ///
    /// `1` on the first invocation, incremented for each retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
