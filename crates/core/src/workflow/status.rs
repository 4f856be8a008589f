use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventBus, EventType};
use crate::storage::WorkflowStore;
use crate::types::{SkipReason, StepStatus, Workflow, WorkflowFilter, WorkflowId, WorkflowStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Derive the workflow-level status from its steps.
///
/// While any step is non-terminal the workflow is `running` (or `pending` if it
/// never started). Once every step is terminal: `failed` beats `cancelled`,
/// which beats `completed`.
pub fn derive_status(workflow: &Workflow) -> WorkflowStatus {
    if !workflow.all_steps_terminal() {
        return if workflow.started_at.is_some() {
            WorkflowStatus::Running
        } else {
            WorkflowStatus::Pending
        };
    }

    if workflow.steps.iter().any(|s| s.status == StepStatus::Failed) {
        return WorkflowStatus::Failed;
    }

    let skipped_by_cancel = workflow
        .steps
        .iter()
        .any(|s| s.skip_reason == Some(SkipReason::Cancelled));
    if workflow.cancel_requested && skipped_by_cancel {
        return WorkflowStatus::Cancelled;
    }

    if workflow.steps.iter().all(|s| s.status == StepStatus::Completed) {
        return WorkflowStatus::Completed;
    }

    // Remaining skips trace back to an interrupted run.
    WorkflowStatus::Failed
}

pub(crate) fn failed_steps(workflow: &Workflow) -> Vec<String> {
    workflow
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| s.name.clone())
        .collect()
}

/// Whole seconds since the workflow started, zero if it never did
pub(crate) fn elapsed_secs(workflow: &Workflow, now: DateTime<Utc>) -> u64 {
    workflow
        .started_at
        .map(|started| (now - started).num_seconds().max(0) as u64)
        .unwrap_or(0)
}

/// Pass-through between the scheduler and the workflow store.
///
/// Persists every transition as a whole-record replace, then publishes the
/// matching events. Holds no workflow state of its own.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn WorkflowStore>,
    events: EventBus,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn WorkflowStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn create(&self, workflow: &Workflow) -> EngineResult<()> {
        self.store.create(workflow)?;
        Ok(())
    }

    /// Persist the current state of `workflow`, then announce `events`
    pub fn record<I>(&self, workflow: &Workflow, events: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = EventType>,
    {
        self.store.replace(workflow)?;
        for event_type in events {
            self.events.publish(Event::new(workflow.id.clone(), event_type));
        }
        Ok(())
    }

    pub fn get(&self, id: &WorkflowId) -> EngineResult<Workflow> {
        self.store
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    pub fn list(&self, filter: WorkflowFilter) -> EngineResult<Vec<Workflow>> {
        Ok(self.store.list(filter)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryWorkflowStore;
    use crate::types::{StepDefinition, WorkflowStep};
    use std::collections::BTreeMap;

    fn workflow(statuses: &[StepStatus]) -> Workflow {
        let steps = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut step = WorkflowStep::from_definition(StepDefinition::new(
                    format!("s{}", i),
                    "zero_shot",
                    "p",
                ));
                step.status = *status;
                step
            })
            .collect();
        Workflow {
            id: WorkflowId::new(),
            name: "derive".to_string(),
            description: None,
            session_id: None,
            status: WorkflowStatus::Running,
            cancel_requested: false,
            steps,
            results: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    #[test]
    fn test_running_while_steps_outstanding() {
        let wf = workflow(&[StepStatus::Completed, StepStatus::Running]);
        assert_eq!(derive_status(&wf), WorkflowStatus::Running);

        let mut never_started = workflow(&[StepStatus::Waiting]);
        never_started.started_at = None;
        assert_eq!(derive_status(&never_started), WorkflowStatus::Pending);
    }

    #[test]
    fn test_all_completed() {
        assert_eq!(
            derive_status(&workflow(&[StepStatus::Completed, StepStatus::Completed])),
            WorkflowStatus::Completed
        );
        assert_eq!(derive_status(&workflow(&[])), WorkflowStatus::Completed);
    }

    #[test]
    fn test_failure_takes_precedence_over_cancellation() {
        let mut wf = workflow(&[StepStatus::Failed, StepStatus::Skipped]);
        wf.cancel_requested = true;
        wf.steps[1].skip_reason = Some(SkipReason::Cancelled);
        assert_eq!(derive_status(&wf), WorkflowStatus::Failed);
    }

    #[test]
    fn test_cancelled_requires_cancel_skip() {
        let mut wf = workflow(&[StepStatus::Completed, StepStatus::Skipped]);
        wf.cancel_requested = true;
        wf.steps[1].skip_reason = Some(SkipReason::Cancelled);
        assert_eq!(derive_status(&wf), WorkflowStatus::Cancelled);

        let mut late = workflow(&[StepStatus::Completed]);
        late.cancel_requested = true;
        assert_eq!(derive_status(&late), WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_tracker_persists_then_publishes() {
        let store = Arc::new(MemoryWorkflowStore::new());
        let tracker = StatusTracker::new(store.clone(), EventBus::new(4));
        let mut rx = tracker.events().subscribe();

        let mut wf = workflow(&[StepStatus::Waiting]);
        tracker.create(&wf).unwrap();

        wf.steps[0].status = StepStatus::Running;
        tracker
            .record(&wf, [EventType::StepStarted { step: "s0".to_string() }])
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.workflow_id, wf.id);
        let stored = tracker.get(&wf.id).unwrap();
        assert_eq!(stored.steps[0].status, StepStatus::Running);
    }

    #[test]
    fn test_tracker_not_found() {
        let tracker = StatusTracker::new(Arc::new(MemoryWorkflowStore::new()), EventBus::default());
        let err = tracker.get(&WorkflowId::from("nope")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
