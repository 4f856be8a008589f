//! Error types for the workflow engine.

use crate::types::{WorkflowId, WorkflowStatus};

/// Structural problems found in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Two steps share a name.
    #[error("duplicate step name: {name}")]
    DuplicateStepName { name: String },

    /// A `depends_on` entry names no step in the definition.
    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    /// A step lists itself as a dependency.
    #[error("step {step} depends on itself")]
    SelfDependency { step: String },

    /// The dependency relation contains a cycle.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Errors reported by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    Validation(#[from] ValidationError),

    #[error("workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("workflow {id} is already {status}")]
    AlreadyTerminal { id: WorkflowId, status: WorkflowStatus },

    #[error("workflow {0} is already running")]
    AlreadyRunning(WorkflowId),

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while invoking a technique.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("technique {0} is not registered")]
    UnknownTechnique(String),

    #[error("provider {0} is not available")]
    UnknownProvider(String),

    #[error("invocation timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}
