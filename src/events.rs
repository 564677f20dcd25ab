//! Domain events, the in-process event bus, and the dead-letter queue.
//!
//! The store gateway emits `CardCreated` on create; the trigger turns each
//! one into a pipeline execution; the aggregator emits
//! `CardValuationCompleted` on persist. The error persistor parks failure
//! messages on the dead-letter queue for operator review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::reasoning::CardHints;

/// Source tag carried on every envelope.
pub const EVENT_SOURCE: &str = "cards";

/// Detail payload of a `CardCreated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardCreatedDetail {
    pub owner_id: String,
    pub card_id: String,
    pub front_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<CardHints>,
    pub timestamp: DateTime<Utc>,
}

/// Detail payload of a `CardValuationCompleted` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationCompletedDetail {
    pub owner_id: String,
    pub card_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_median: Option<i64>,
    pub authenticity_score: f64,
    pub fake_detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Typed event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detailType", content = "detail")]
pub enum EventDetail {
    CardCreated(CardCreatedDetail),
    CardValuationCompleted(ValuationCompletedDetail),
}

/// Envelope every event travels in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Timestamp-based identifier; doubles as the execution's request id
    /// and idempotency key.
    pub id: String,
    pub source: String,
    #[serde(flatten)]
    pub detail: EventDetail,
}

impl EventEnvelope {
    /// Wrap a `CardCreated` detail, deriving the timestamp-based id.
    pub fn card_created(detail: CardCreatedDetail) -> Self {
        let id = format!("{}-{}", detail.card_id, detail.timestamp.timestamp_millis());
        Self {
            id,
            source: EVENT_SOURCE.to_string(),
            detail: EventDetail::CardCreated(detail),
        }
    }

    /// Wrap a `CardValuationCompleted` detail.
    pub fn valuation_completed(detail: ValuationCompletedDetail) -> Self {
        let id = format!(
            "{}-valued-{}",
            detail.card_id,
            detail.timestamp.timestamp_millis()
        );
        Self {
            id,
            source: EVENT_SOURCE.to_string(),
            detail: EventDetail::CardValuationCompleted(detail),
        }
    }
}

/// In-process broadcast bus for domain events.
///
/// Emission never blocks; events published with no subscribers are dropped,
/// which matches fire-and-forget delivery.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with the given buffered capacity per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: EventEnvelope) {
        let receivers = self.sender.receiver_count();
        if self.sender.send(event.clone()).is_err() {
            tracing::debug!(event_id = %event.id, "event dropped: no subscribers");
        } else {
            tracing::debug!(event_id = %event.id, receivers, "event published");
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Structured failure message parked for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub request_id: String,
    pub owner_id: String,
    pub card_id: String,
    pub failed_stage: String,
    pub error_kind: String,
    pub error_detail: String,
    /// Stages that did complete before the failure.
    pub partial_stages: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// In-memory dead-letter queue.
#[derive(Clone, Default)]
pub struct DeadLetterQueue {
    messages: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetterQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a failure message.
    pub async fn push(&self, letter: DeadLetter) {
        tracing::error!(
            request_id = %letter.request_id,
            owner_id = %letter.owner_id,
            card_id = %letter.card_id,
            failed_stage = %letter.failed_stage,
            error_kind = %letter.error_kind,
            "pipeline failure parked on dead-letter queue"
        );
        self.messages.lock().await.push(letter);
    }

    /// Drain all parked messages.
    pub async fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.messages.lock().await)
    }

    /// Number of parked messages.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created_detail() -> CardCreatedDetail {
        CardCreatedDetail {
            owner_id: "owner-1".to_string(),
            card_id: "card-1".to_string(),
            front_key: "uploads/owner-1/u-front.jpg".to_string(),
            back_key: None,
            hints: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_card_created_id_is_timestamp_based() {
        let detail = created_detail();
        let millis = detail.timestamp.timestamp_millis();
        let envelope = EventEnvelope::card_created(detail);
        assert_eq!(envelope.id, format!("card-1-{}", millis));
        assert_eq!(envelope.source, EVENT_SOURCE);
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = EventEnvelope::card_created(created_detail());
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["source"], "cards");
        assert_eq!(json["detailType"], "CardCreated");
        assert_eq!(json["detail"]["ownerId"], "owner-1");
        assert_eq!(json["detail"]["frontKey"], "uploads/owner-1/u-front.jpg");
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscriber() {
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();

        let envelope = EventEnvelope::card_created(created_detail());
        bus.emit(envelope.clone());

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn test_bus_tolerates_no_subscribers() {
        let bus = EventBus::new(8);
        bus.emit(EventEnvelope::card_created(created_detail()));
    }

    #[tokio::test]
    async fn test_dead_letter_queue_roundtrip() {
        let queue = DeadLetterQueue::new();
        assert!(queue.is_empty().await);

        queue
            .push(DeadLetter {
                request_id: "req-1".to_string(),
                owner_id: "owner-1".to_string(),
                card_id: "card-1".to_string(),
                failed_stage: "extract_features".to_string(),
                error_kind: "InvalidContent".to_string(),
                error_detail: "moderation label".to_string(),
                partial_stages: vec![],
                timestamp: Utc::now(),
            })
            .await;

        assert_eq!(queue.len().await, 1);
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty().await);
    }
}
