use crate::types::{SkipReason, WorkflowId, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A transition observed on a workflow or one of its steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub workflow_id: WorkflowId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(workflow_id: WorkflowId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of transitions published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    StepStarted {
        step: String,
    },
    StepCompleted {
        step: String,
    },
    StepFailed {
        step: String,
        error: String,
    },
    StepSkipped {
        step: String,
        reason: SkipReason,
    },
    CancellationRequested,
    WorkflowCompleted {
        duration_secs: u64,
    },
    WorkflowFailed {
        failed_steps: Vec<String>,
        duration_secs: u64,
    },
    WorkflowCancelled {
        duration_secs: u64,
    },
}

impl EventType {
    /// The event that announces a workflow reaching `status`, if terminal
    pub fn terminal(status: WorkflowStatus, failed_steps: Vec<String>, duration_secs: u64) -> Option<Self> {
        match status {
            WorkflowStatus::Completed => Some(Self::WorkflowCompleted { duration_secs }),
            WorkflowStatus::Failed => Some(Self::WorkflowFailed {
                failed_steps,
                duration_secs,
            }),
            WorkflowStatus::Cancelled => Some(Self::WorkflowCancelled { duration_secs }),
            WorkflowStatus::Pending | WorkflowStatus::Running => None,
        }
    }
}

/// Fan-out of transition events to any number of subscribers.
///
/// Lagging subscribers lose the oldest events; publishing never waits.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // No receivers is not an error: nobody is watching.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
