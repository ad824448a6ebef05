use crate::definition::{WorkflowDefinition, WorkflowName};
use crate::error::WorkflowError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A registry mapping workflow names to their immutable definitions.
///
/// Registration happens once at startup; the engine looks definitions up by
/// name every time it starts or advances a run.
///
/// # Examples
///
/// ```
/// use tsuzuri::{WorkflowDefinition, WorkflowRegistry};
/// use serde_json::json;
///
/// let mut registry = WorkflowRegistry::new();
/// let definition = WorkflowDefinition::builder("user-signup")
///     .step("create-user", |_ctx| async move { Ok(json!({})) })
///     .build()
///     .expect("valid definition");
///
/// registry.register(definition).expect("first registration");
/// assert!(registry.contains("user-signup"));
/// ```
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<WorkflowName, Arc<WorkflowDefinition>>,
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkflowRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::DuplicateWorkflow`] if the name is taken.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), WorkflowError> {
        let name = definition.name().clone();
        if self.workflows.contains_key(&name) {
            return Err(WorkflowError::DuplicateWorkflow(name));
        }
        self.workflows.insert(name, Arc::new(definition));
        Ok(())
    }

    /// Looks up a definition by name.
    pub fn get(&self, name: impl AsRef<str>) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name.as_ref()).cloned()
    }

    /// Whether a workflow with this name is registered.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.workflows.contains_key(name.as_ref())
    }

    /// Number of registered workflows.
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Names of all registered workflows.
    pub fn list(&self) -> Vec<WorkflowName> {
        self.workflows.keys().cloned().collect()
    }
}
