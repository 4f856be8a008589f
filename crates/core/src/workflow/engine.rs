use super::cancel::{skip_unstarted, CancellationRegistry};
use super::dag::validate;
use super::executor::WorkflowExecutor;
use super::status::{derive_status, elapsed_secs, failed_steps, StatusTracker};
use crate::agent::AgentInvoker;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, EventType};
use crate::storage::WorkflowStore;
use crate::types::{
    SkipReason, StepStatus, Workflow, WorkflowDefinition, WorkflowFilter, WorkflowId,
    WorkflowStatus,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

const INTERRUPTED_ERROR: &str = "interrupted before completion";

/// Front door of the engine: creates, runs, cancels and reports on workflows.
///
/// `execute` and `cancel` are admitted one at a time so a cancel never races
/// the start of a scheduling loop. Once a loop is live it is the only writer
/// of its workflow.
pub struct WorkflowEngine {
    tracker: StatusTracker,
    executor: Arc<WorkflowExecutor>,
    cancellations: Arc<CancellationRegistry>,
    /// Completion flags of live loops; the sender drops when the loop ends
    running: Arc<Mutex<HashMap<WorkflowId, watch::Receiver<()>>>>,
    admission: Mutex<()>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        invoker: Arc<dyn AgentInvoker>,
        events: EventBus,
    ) -> Self {
        let tracker = StatusTracker::new(store, events);
        let executor = Arc::new(WorkflowExecutor::new(tracker.clone(), invoker));
        Self {
            tracker,
            executor,
            cancellations: Arc::new(CancellationRegistry::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            admission: Mutex::new(()),
        }
    }

    pub fn events(&self) -> &EventBus {
        self.tracker.events()
    }

    /// Validate `definition` and store it as a `pending` workflow
    pub fn validate_and_create(&self, definition: WorkflowDefinition) -> EngineResult<Workflow> {
        let validated = validate(definition)?;
        let workflow = validated.into_workflow();
        self.tracker.create(&workflow)?;

        tracing::info!(
            "Created workflow {} ({}) with {} steps",
            workflow.id,
            workflow.name,
            workflow.steps.len()
        );
        Ok(workflow)
    }

    /// Start the scheduling loop for a `pending` workflow and return at once.
    ///
    /// The returned snapshot is the workflow as it was persisted on start.
    pub async fn execute(&self, id: &WorkflowId) -> EngineResult<Workflow> {
        let _admitted = self.admission.lock().await;

        let mut workflow = self.tracker.get(id)?;
        match workflow.status {
            WorkflowStatus::Pending => {}
            WorkflowStatus::Running => return Err(EngineError::AlreadyRunning(id.clone())),
            status => {
                return Err(EngineError::AlreadyTerminal {
                    id: id.clone(),
                    status,
                })
            }
        }

        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());

        let signal = self.cancellations.register(id).await;
        if let Err(e) = self.tracker.record(&workflow, [EventType::WorkflowStarted]) {
            self.cancellations.release(id).await;
            return Err(e);
        }

        // Held across spawn and insert so the loop cannot deregister first.
        let mut running = self.running.lock().await;
        let (done_tx, done_rx) = watch::channel(());

        let executor = self.executor.clone();
        let tracker = self.tracker.clone();
        let cancellations = self.cancellations.clone();
        let registry = self.running.clone();
        let task_id = id.clone();
        let snapshot = workflow.clone();

        tokio::spawn(async move {
            match executor.run(snapshot, signal).await {
                Ok(finished) => tracing::debug!(
                    "Scheduling loop for workflow {} ended as {}",
                    task_id,
                    finished.status
                ),
                Err(e) => {
                    tracing::error!("Scheduling loop for workflow {} aborted: {}", task_id, e);
                    if let Err(e) = settle_aborted(&tracker, &task_id) {
                        tracing::error!(
                            "Workflow {} left running after its loop aborted: {}",
                            task_id,
                            e
                        );
                    }
                }
            }
            cancellations.release(&task_id).await;
            registry.lock().await.remove(&task_id);
            drop(done_tx);
        });

        running.insert(id.clone(), done_rx);
        tracing::info!("Executing workflow {}", id);
        Ok(workflow)
    }

    /// Request cancellation.
    ///
    /// A live loop is signalled and observes the request on its own. A
    /// workflow with no live loop is resolved here: a `pending` one becomes
    /// `cancelled` with every step skipped.
    pub async fn cancel(&self, id: &WorkflowId) -> EngineResult<Workflow> {
        let _admitted = self.admission.lock().await;

        let mut workflow = self.tracker.get(id)?;
        if workflow.is_terminal() {
            return Err(EngineError::AlreadyTerminal {
                id: id.clone(),
                status: workflow.status,
            });
        }

        if self.cancellations.signal(id).await {
            tracing::info!("Cancellation requested for running workflow {}", id);
            return Ok(workflow);
        }

        let now = Utc::now();
        let mut events = vec![EventType::CancellationRequested];
        events.extend(skip_unstarted(&mut workflow, now));

        let status = match workflow.status {
            WorkflowStatus::Pending => WorkflowStatus::Cancelled,
            _ => {
                // Marked running but nothing is driving it.
                events.extend(interrupt(&mut workflow, now));
                derive_status(&workflow)
            }
        };
        workflow.status = status;
        workflow.completed_at = Some(now);

        let duration_secs = elapsed_secs(&workflow, now);
        events.extend(EventType::terminal(status, failed_steps(&workflow), duration_secs));
        self.tracker.record(&workflow, events)?;

        tracing::info!("Workflow {} cancelled before its loop ran", id);
        Ok(workflow)
    }

    pub fn get_status(&self, id: &WorkflowId) -> EngineResult<Workflow> {
        self.tracker.get(id)
    }

    pub fn list(&self, filter: WorkflowFilter) -> EngineResult<Vec<Workflow>> {
        self.tracker.list(filter)
    }

    /// Wait for the live loop of `id` to end, if there is one, then return
    /// the stored workflow
    pub async fn wait(&self, id: &WorkflowId) -> EngineResult<Workflow> {
        let pending = self.running.lock().await.get(id).cloned();
        if let Some(mut done) = pending {
            // Errors once the loop drops its sender.
            let _ = done.changed().await;
        }
        self.tracker.get(id)
    }

    /// Resolve workflows left `running` by a previous process.
    ///
    /// Steps that were in flight fail, steps that never started are skipped,
    /// and the workflow settles to a terminal status. Returns how many
    /// workflows were resolved.
    pub async fn recover_interrupted(&self) -> EngineResult<usize> {
        let _admitted = self.admission.lock().await;
        let mut recovered = 0;

        for mut workflow in self.tracker.list(WorkflowFilter::active())? {
            if workflow.status != WorkflowStatus::Running
                || self.cancellations.is_active(&workflow.id).await
            {
                continue;
            }

            let events = settle_interrupted(&mut workflow, Utc::now());
            self.tracker.record(&workflow, events)?;

            tracing::warn!(
                "Recovered interrupted workflow {} as {}",
                workflow.id,
                workflow.status
            );
            recovered += 1;
        }

        Ok(recovered)
    }
}

/// Settle the stored record of a loop that returned an error
fn settle_aborted(tracker: &StatusTracker, id: &WorkflowId) -> EngineResult<()> {
    let mut workflow = tracker.get(id)?;
    if workflow.status != WorkflowStatus::Running {
        return Ok(());
    }
    let events = settle_interrupted(&mut workflow, Utc::now());
    tracker.record(&workflow, events)?;
    tracing::warn!("Settled aborted workflow {} as {}", id, workflow.status);
    Ok(())
}

/// Interrupt whatever has not finished and derive the terminal status
fn settle_interrupted(workflow: &mut Workflow, now: DateTime<Utc>) -> Vec<EventType> {
    let mut events = interrupt(workflow, now);
    workflow.status = derive_status(workflow);
    workflow.completed_at = Some(now);

    let duration_secs = elapsed_secs(workflow, now);
    events.extend(EventType::terminal(
        workflow.status,
        failed_steps(workflow),
        duration_secs,
    ));
    events
}

/// Fail steps that were in flight and skip those never started
fn interrupt(workflow: &mut Workflow, now: DateTime<Utc>) -> Vec<EventType> {
    let mut events = Vec::new();
    for step in &mut workflow.steps {
        match step.status {
            StepStatus::Running | StepStatus::Ready => {
                step.fail(INTERRUPTED_ERROR.to_string(), now);
                events.push(EventType::StepFailed {
                    step: step.name.clone(),
                    error: INTERRUPTED_ERROR.to_string(),
                });
            }
            StepStatus::Waiting => {
                step.skip(SkipReason::Interrupted, now);
                events.push(EventType::StepSkipped {
                    step: step.name.clone(),
                    reason: SkipReason::Interrupted,
                });
            }
            _ => {}
        }
    }
    events
}
