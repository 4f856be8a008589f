pub mod index;
pub mod memory;

pub use index::RedbWorkflowStore;
pub use memory::MemoryWorkflowStore;

use crate::types::{Workflow, WorkflowFilter, WorkflowId};
use anyhow::Result;

/// Durable keyed storage for workflow records.
///
/// Every write replaces the whole record, so a reader never sees a partially
/// applied transition.
pub trait WorkflowStore: Send + Sync {
    /// Insert a new workflow; fails if the id is already taken
    fn create(&self, workflow: &Workflow) -> Result<()>;

    /// Get a workflow by ID
    fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>>;

    /// Atomically replace an existing workflow record
    fn replace(&self, workflow: &Workflow) -> Result<()>;

    /// List workflows matching `filter`, most recently created first
    fn list(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>>;
}

/// Sort newest first and apply the filter's limit
pub(crate) fn finish_listing(mut workflows: Vec<Workflow>, filter: WorkflowFilter) -> Vec<Workflow> {
    workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(limit) = filter.limit {
        workflows.truncate(limit);
    }
    workflows
}
