use crate::events::EventType;
use crate::types::{SkipReason, StepStatus, Workflow, WorkflowId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Cancellation tokens for workflows whose scheduling loop is live
#[derive(Default)]
pub struct CancellationRegistry {
    active: RwLock<HashMap<WorkflowId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loop for `id` and hand back its signal
    pub async fn register(&self, id: &WorkflowId) -> CancelSignal {
        let token = CancellationToken::new();
        self.active.write().await.insert(id.clone(), token.clone());
        CancelSignal { token }
    }

    /// Cancel the token for `id`. Returns false when no loop is registered.
    pub async fn signal(&self, id: &WorkflowId) -> bool {
        match self.active.read().await.get(id) {
            Some(token) => {
                token.cancel();
                tracing::info!("Cancellation signal sent for workflow {}", id);
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self, id: &WorkflowId) -> bool {
        self.active.read().await.contains_key(id)
    }

    pub async fn release(&self, id: &WorkflowId) {
        self.active.write().await.remove(id);
    }
}

/// Receiving end of a workflow's cancellation token
#[derive(Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    /// A signal nobody else holds, so it never fires
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Skip every step that has not started yet. Steps already running are left
/// alone so their outcome is still recorded.
pub fn skip_unstarted(workflow: &mut Workflow, now: DateTime<Utc>) -> Vec<EventType> {
    workflow.cancel_requested = true;
    let mut events = Vec::new();
    for step in &mut workflow.steps {
        if matches!(step.status, StepStatus::Waiting | StepStatus::Ready) {
            step.skip(SkipReason::Cancelled, now);
            tracing::info!("Skipped step {} of workflow {}: cancelled", step.name, workflow.id);
            events.push(EventType::StepSkipped {
                step: step.name.clone(),
                reason: SkipReason::Cancelled,
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_reaches_registered_loop() {
        let registry = CancellationRegistry::new();
        let id = WorkflowId::new();
        let signal = registry.register(&id).await;
        assert!(!signal.is_cancelled());
        assert!(registry.is_active(&id).await);

        assert!(registry.signal(&id).await);
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
        assert!(signal.is_cancelled());

        registry.release(&id).await;
        assert!(!registry.signal(&id).await);
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
    }
}
