pub mod cancel;
pub mod context;
pub mod dag;
pub mod engine;
pub mod executor;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::{CancelSignal, CancellationRegistry};
pub use context::{compose_input, compose_prompt};
pub use dag::{validate, ValidatedWorkflow, WorkflowDag};
pub use engine::WorkflowEngine;
pub use executor::WorkflowExecutor;
pub use status::{derive_status, StatusTracker};
