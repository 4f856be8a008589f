use super::{finish_listing, WorkflowStore};
use crate::types::{Workflow, WorkflowFilter, WorkflowId};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-process workflow store. Records do not outlive the process.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("Workflow store lock poisoned")
}

impl WorkflowStore for MemoryWorkflowStore {
    fn create(&self, workflow: &Workflow) -> Result<()> {
        let mut workflows = self.workflows.write().map_err(|_| poisoned())?;
        if workflows.contains_key(&workflow.id) {
            return Err(anyhow!("Workflow {} already exists", workflow.id));
        }
        workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>> {
        let workflows = self.workflows.read().map_err(|_| poisoned())?;
        Ok(workflows.get(id).cloned())
    }

    fn replace(&self, workflow: &Workflow) -> Result<()> {
        let mut workflows = self.workflows.write().map_err(|_| poisoned())?;
        match workflows.get_mut(&workflow.id) {
            Some(existing) => {
                *existing = workflow.clone();
                Ok(())
            }
            None => Err(anyhow!("Workflow {} does not exist", workflow.id)),
        }
    }

    fn list(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>> {
        let workflows = self.workflows.read().map_err(|_| poisoned())?;
        let matching = workflows
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();
        Ok(finish_listing(matching, filter))
    }
}
