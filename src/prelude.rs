//! Commonly used types and traits

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::context::StepContext;
pub use crate::definition::{WorkflowDefinition, WorkflowName};
pub use crate::engine::Engine;
pub use crate::error::{StepError, WorkflowError};
pub use crate::registry::WorkflowRegistry;
pub use crate::run::{RunId, RunStatus, WorkflowRun};
pub use crate::step::{RetryPolicy, StepConfig, StepName};
pub use crate::store::{MemoryStore, RunStore};
