//! Event trigger: turns `CardCreated` events into pipeline executions.
//!
//! The event's timestamp-based identifier becomes the execution's request
//! id and its idempotency key: a second event with the same id is
//! discarded without starting an execution.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::events::{EventDetail, EventEnvelope};
use crate::orchestrator::{PipelineInput, PipelineOrchestrator, PipelineOutcome};

/// Listens for creation events and starts executions.
pub struct EventTrigger {
    orchestrator: Arc<PipelineOrchestrator>,
    seen: Mutex<HashSet<String>>,
}

impl EventTrigger {
    /// Create a trigger over the orchestrator.
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            orchestrator,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Handle one event.
    ///
    /// Returns `None` for events that are not `CardCreated` and for
    /// duplicates of an already-handled id.
    pub async fn handle(&self, envelope: EventEnvelope) -> Option<PipelineOutcome> {
        let detail = match envelope.detail {
            EventDetail::CardCreated(detail) => detail,
            EventDetail::CardValuationCompleted(_) => return None,
        };

        {
            let mut seen = self.seen.lock().await;
            if !seen.insert(envelope.id.clone()) {
                tracing::info!(
                    request_id = %envelope.id,
                    owner_id = %detail.owner_id,
                    card_id = %detail.card_id,
                    "duplicate creation event discarded"
                );
                return None;
            }
        }

        let input = PipelineInput {
            request_id: envelope.id,
            owner_id: detail.owner_id,
            card_id: detail.card_id,
            front_key: detail.front_key,
            back_key: detail.back_key,
            hints: detail.hints,
        };

        Some(self.orchestrator.run(input).await)
    }

    /// Consume events from a bus subscription until the bus closes.
    ///
    /// Lagged receivers skip ahead rather than aborting; the missed events
    /// are logged and lost, matching fire-and-forget delivery.
    pub async fn listen(&self, mut receiver: broadcast::Receiver<EventEnvelope>) {
        loop {
            match receiver.recv().await {
                Ok(envelope) => {
                    self.handle(envelope).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event trigger lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
