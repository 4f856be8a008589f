//! Scripted invoker and helpers shared by the scheduler and engine tests.

use crate::agent::{AgentInvoker, InvocationRequest};
use crate::error::AgentError;
use crate::storage::WorkflowStore;
use crate::types::{AgentOutput, StepDefinition, Workflow, WorkflowDefinition, WorkflowId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Invoker whose behaviour is fixed per step name.
///
/// Successful steps answer `"<name> output"`.
#[derive(Default)]
pub struct ScriptedInvoker {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    gates: HashMap<String, Arc<Notify>>,
    calls: Mutex<Vec<InvocationRequest>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, step: &str) -> Self {
        self.failing.insert(step.to_string());
        self
    }

    pub fn delayed(mut self, step: &str, delay: Duration) -> Self {
        self.delays.insert(step.to_string(), delay);
        self
    }

    /// Hold `step` until the returned gate is notified
    pub fn gated(mut self, step: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gates.insert(step.to_string(), gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Vec<InvocationRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.step).collect()
    }

    /// Highest number of invocations observed in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<AgentOutput, AgentError> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = self.gates.get(&request.step) {
            gate.notified().await;
        }
        if let Some(delay) = self.delays.get(&request.step) {
            tokio::time::sleep(*delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&request.step) {
            return Err(AgentError::Provider(format!("{} exploded", request.step)));
        }
        Ok(AgentOutput {
            result: format!("{} output", request.step),
            ..Default::default()
        })
    }
}

/// Definition built from `(name, depends_on)` pairs; every prompt is the
/// step's own name
pub fn definition(steps: &[(&str, &[&str])]) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "test-workflow".to_string(),
        description: None,
        steps: steps
            .iter()
            .map(|(name, deps)| {
                StepDefinition::new(*name, "zero_shot", *name).depends_on(deps.iter().copied())
            })
            .collect(),
        session_id: None,
    }
}

/// Poll the store until `predicate` holds for the stored workflow
pub async fn eventually<F>(store: &dyn WorkflowStore, id: &WorkflowId, predicate: F) -> Workflow
where
    F: Fn(&Workflow) -> bool,
{
    for _ in 0..1000 {
        if let Some(workflow) = store.get(id).unwrap() {
            if predicate(&workflow) {
                return workflow;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held for workflow {}", id);
}
