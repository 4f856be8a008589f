use super::cancel::{skip_unstarted, CancelSignal};
use super::context::compose_input;
use super::dag::WorkflowDag;
use super::status::{derive_status, elapsed_secs, failed_steps, StatusTracker};
use crate::agent::{AgentInvoker, InvocationRequest};
use crate::error::{AgentError, EngineResult};
use crate::events::EventType;
use crate::types::{AgentOutput, SkipReason, StepStatus, Workflow, WorkflowStatus};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Drives one workflow's scheduling loop.
///
/// Each pass skips steps whose dependencies did not succeed, dispatches every
/// ready step concurrently, and waits for the whole batch before the next
/// pass. The loop ends once a pass finds nothing to skip and nothing to run.
pub struct WorkflowExecutor {
    tracker: StatusTracker,
    invoker: Arc<dyn AgentInvoker>,
}

impl WorkflowExecutor {
    pub fn new(tracker: StatusTracker, invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { tracker, invoker }
    }

    /// Run `workflow` to a terminal status.
    ///
    /// The workflow must already be persisted as `running`.
    pub async fn run(&self, mut workflow: Workflow, cancel: CancelSignal) -> EngineResult<Workflow> {
        let dag = WorkflowDag::from_workflow(&workflow)?;
        let mut pass = 0u32;

        tracing::info!(
            "Starting scheduling loop for workflow {} ({} steps)",
            workflow.id,
            workflow.steps.len()
        );

        loop {
            pass += 1;
            let mut events = Vec::new();

            if cancel.is_cancelled() && !workflow.cancel_requested {
                events.extend(self.observe_cancellation(&mut workflow));
            }

            events.extend(apply_skip_set(&mut workflow, &dag));

            let ready = ready_set(&workflow, &dag);
            if ready.is_empty() && events.is_empty() {
                break;
            }

            for name in &ready {
                if let Some(step) = workflow.step_mut(name) {
                    step.status = StepStatus::Ready;
                }
            }
            self.tracker.record(&workflow, events)?;

            if ready.is_empty() {
                continue;
            }

            tracing::debug!(
                "Pass {} of workflow {}: dispatching {} step(s)",
                pass,
                workflow.id,
                ready.len()
            );
            self.dispatch(&mut workflow, ready, &cancel).await?;
        }

        self.finish(&mut workflow)?;
        Ok(workflow)
    }

    fn observe_cancellation(&self, workflow: &mut Workflow) -> Vec<EventType> {
        tracing::info!("Workflow {} cancellation observed", workflow.id);
        let mut events = vec![EventType::CancellationRequested];
        events.extend(skip_unstarted(workflow, Utc::now()));
        events
    }

    /// Start every step in `ready` and wait until all of them have returned.
    async fn dispatch(
        &self,
        workflow: &mut Workflow,
        ready: Vec<String>,
        cancel: &CancelSignal,
    ) -> EngineResult<()> {
        let mut join_set = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut events = Vec::with_capacity(ready.len());
        let now = Utc::now();

        for name in ready {
            let Some(step) = workflow.step(&name) else {
                continue;
            };
            // Enrichment goes into the request only; the stored prompt is untouched.
            let request = InvocationRequest {
                step: name.clone(),
                technique: step.technique.clone(),
                input: compose_input(step, &workflow.results),
                provider: step.provider.clone(),
                parameters: step.parameters.clone(),
                examples: step.examples.clone(),
            };

            if let Some(step) = workflow.step_mut(&name) {
                step.mark_running(now);
            }
            tracing::info!("Started step {} for workflow {}", name, workflow.id);
            events.push(EventType::StepStarted { step: name.clone() });
            in_flight.insert(name.clone());

            let invoker = self.invoker.clone();
            join_set.spawn(async move {
                let outcome = invoker.invoke(request).await;
                (name, outcome)
            });
        }
        self.tracker.record(workflow, events)?;

        while !join_set.is_empty() {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok((name, outcome))) => {
                        in_flight.remove(&name);
                        let event = record_outcome(workflow, &name, outcome);
                        self.tracker.record(workflow, [event])?;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Invocation task for workflow {} ended abnormally: {}", workflow.id, e);
                    }
                    None => break,
                },
                _ = cancel.cancelled(), if !workflow.cancel_requested => {
                    let events = self.observe_cancellation(workflow);
                    self.tracker.record(workflow, events)?;
                }
            }
        }

        // A task that panicked never reported back.
        if !in_flight.is_empty() {
            let mut events = Vec::new();
            for name in in_flight {
                let error = AgentError::Provider("invocation task terminated unexpectedly".to_string());
                events.push(record_outcome(workflow, &name, Err(error)));
            }
            self.tracker.record(workflow, events)?;
        }

        Ok(())
    }

    /// Settle the workflow-level status once every step is terminal.
    fn finish(&self, workflow: &mut Workflow) -> EngineResult<()> {
        let now = Utc::now();
        let status = derive_status(workflow);
        workflow.status = status;
        workflow.completed_at = Some(now);

        let duration_secs = elapsed_secs(workflow, now);
        let failed_steps = failed_steps(workflow);

        match status {
            WorkflowStatus::Failed => tracing::error!(
                "Workflow {} failed: steps {:?} did not succeed",
                workflow.id,
                failed_steps
            ),
            _ => tracing::info!("Workflow {} finished as {}", workflow.id, status),
        }

        let event = EventType::terminal(status, failed_steps, duration_secs);
        self.tracker.record(workflow, event)?;
        Ok(())
    }
}

fn statuses(workflow: &Workflow) -> HashMap<&str, StepStatus> {
    workflow
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.status))
        .collect()
}

/// Waiting steps whose every dependency has completed
pub fn ready_set(workflow: &Workflow, dag: &WorkflowDag) -> Vec<String> {
    let statuses = statuses(workflow);
    workflow
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Waiting)
        .filter(|s| {
            dag.dependencies(&s.name)
                .into_iter()
                .all(|dep| statuses.get(dep) == Some(&StepStatus::Completed))
        })
        .map(|s| s.name.clone())
        .collect()
}

/// Waiting or ready steps paired with a dependency that failed or was skipped
pub fn skip_set(workflow: &Workflow, dag: &WorkflowDag) -> Vec<(String, String)> {
    let statuses = statuses(workflow);
    workflow
        .steps
        .iter()
        .filter(|s| matches!(s.status, StepStatus::Waiting | StepStatus::Ready))
        .filter_map(|s| {
            dag.dependencies(&s.name)
                .into_iter()
                .find(|dep| statuses.get(dep).is_some_and(|st| st.blocks_dependents()))
                .map(|dep| (s.name.clone(), dep.to_string()))
        })
        .collect()
}

fn apply_skip_set(workflow: &mut Workflow, dag: &WorkflowDag) -> Vec<EventType> {
    let now = Utc::now();
    let mut events = Vec::new();
    for (name, dependency) in skip_set(workflow, dag) {
        if let Some(step) = workflow.step_mut(&name) {
            tracing::info!(
                "Skipping step {} due to unsuccessful dependency {}",
                name,
                dependency
            );
            let reason = SkipReason::DependencyFailed { dependency };
            step.skip(reason.clone(), now);
            events.push(EventType::StepSkipped { step: name, reason });
        }
    }
    events
}

fn record_outcome(
    workflow: &mut Workflow,
    name: &str,
    outcome: Result<AgentOutput, AgentError>,
) -> EventType {
    let now = Utc::now();
    match outcome {
        Ok(output) => {
            if let Some(step) = workflow.step_mut(name) {
                step.complete(output.result.clone(), now);
            }
            workflow.results.insert(name.to_string(), output);
            tracing::info!("Completed step {} for workflow {}", name, workflow.id);
            EventType::StepCompleted {
                step: name.to_string(),
            }
        }
        Err(e) => {
            let error = e.to_string();
            if let Some(step) = workflow.step_mut(name) {
                step.fail(error.clone(), now);
            }
            tracing::warn!("Step {} of workflow {} failed: {}", name, workflow.id, error);
            EventType::StepFailed {
                step: name.to_string(),
                error,
            }
        }
    }
}
