//! Error persistor: the orchestrator's catch arm.
//!
//! Writes whatever partial outputs exist, records the failure on the
//! record, and parks a structured message on the dead-letter queue. A
//! moderation rejection at Extract additionally hard-deletes the record to
//! purge orphaned state.

use chrono::Utc;
use std::sync::Arc;

use crate::authenticity::AuthenticityResult;
use crate::config::DeleteMode;
use crate::context::{Stage, StageContext};
use crate::error::{Error, ErrorKind};
use crate::events::{DeadLetter, DeadLetterQueue};
use crate::pricing::PricingResult;
use crate::reasoning::CardMetadata;
use crate::store::{RecordError, SqliteCardStore};

/// Whatever stage outputs existed when the execution failed.
#[derive(Debug, Clone, Default)]
pub struct PartialOutputs {
    pub metadata: Option<CardMetadata>,
    pub pricing: Option<PricingResult>,
    pub authenticity: Option<AuthenticityResult>,
}

impl PartialOutputs {
    /// Names of the stages that did produce output.
    pub fn completed_stages(&self) -> Vec<String> {
        let mut stages = Vec::new();
        if self.metadata.is_some() {
            stages.push(Stage::ReasonOcr.as_str().to_string());
        }
        if self.pricing.is_some() {
            stages.push(Stage::PriceCard.as_str().to_string());
        }
        if self.authenticity.is_some() {
            stages.push(Stage::VerifyAuthenticity.as_str().to_string());
        }
        stages
    }
}

/// Persists partial results when an execution fails.
pub struct ErrorPersistor {
    store: Arc<SqliteCardStore>,
    dead_letters: DeadLetterQueue,
}

impl ErrorPersistor {
    /// Create a persistor over the store gateway and dead-letter queue.
    pub fn new(store: Arc<SqliteCardStore>, dead_letters: DeadLetterQueue) -> Self {
        Self {
            store,
            dead_letters,
        }
    }

    /// Record the failure. Best-effort: persistence problems are logged,
    /// never raised, so the catch arm cannot itself fail the execution.
    pub async fn persist_failure(
        &self,
        ctx: &StageContext,
        failed_stage: Stage,
        error: &Error,
        partial: PartialOutputs,
    ) {
        let kind = error.kind();

        self.dead_letters
            .push(DeadLetter {
                request_id: ctx.request_id.clone(),
                owner_id: ctx.owner_id.clone(),
                card_id: ctx.card_id.clone(),
                failed_stage: failed_stage.as_str().to_string(),
                error_kind: kind.to_string(),
                error_detail: error.to_string(),
                partial_stages: partial.completed_stages(),
                timestamp: Utc::now(),
            })
            .await;

        // Moderation and card-type rejections purge the orphaned record
        // and its uploaded objects entirely.
        if kind == ErrorKind::InvalidContent && failed_stage == Stage::ExtractFeatures {
            if let Err(delete_error) = self
                .store
                .delete(&ctx.owner_id, &ctx.card_id, DeleteMode::Hard)
                .await
            {
                tracing::error!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %delete_error,
                    "failed to hard-delete rejected upload"
                );
            }
            return;
        }

        match self.store.get(&ctx.owner_id, &ctx.card_id) {
            Ok(mut record) => {
                if let Some(metadata) = partial.metadata {
                    record.ocr_metadata = Some(metadata);
                }
                if let Some(pricing) = partial.pricing {
                    record.pricing = Some(pricing);
                }
                if let Some(authenticity) = partial.authenticity {
                    record.authenticity = Some(authenticity);
                }
                record.last_error = Some(RecordError {
                    failed_stage: failed_stage.as_str().to_string(),
                    error_kind: kind.to_string(),
                    error_detail: error.to_string(),
                    occurred_at: Utc::now(),
                });
                record.updated_at = Utc::now();

                if let Err(update_error) = self.store.update(&record) {
                    tracing::error!(
                        request_id = %ctx.request_id,
                        owner_id = %ctx.owner_id,
                        card_id = %ctx.card_id,
                        error = %update_error,
                        "failed to persist partial outputs"
                    );
                }
            }
            Err(get_error) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %get_error,
                    "record unavailable while persisting failure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::ErrorKind;
    use crate::events::EventBus;
    use crate::objects::{MemoryObjectStore, ObjectRef};
    use crate::store::CardRecord;
    use std::time::Duration;

    fn setup() -> (
        ErrorPersistor,
        Arc<SqliteCardStore>,
        Arc<MemoryObjectStore>,
        DeadLetterQueue,
        StageContext,
    ) {
        let events = EventBus::new(16);
        let objects = Arc::new(MemoryObjectStore::new(&PipelineConfig::default()));
        let store =
            Arc::new(SqliteCardStore::in_memory(events, objects.clone(), "cards").unwrap());
        let queue = DeadLetterQueue::new();
        let persistor = ErrorPersistor::new(store.clone(), queue.clone());
        let ctx = StageContext::new("req-1", "owner-1", "card-1", Duration::from_secs(120));
        (persistor, store, objects, queue, ctx)
    }

    #[tokio::test]
    async fn test_persists_partials_and_records_error() {
        let (persistor, store, _, queue, ctx) = setup();
        store
            .create(
                &CardRecord::new("owner-1", "card-1", "uploads/owner-1/u-f.jpg", None),
                None,
            )
            .unwrap();

        let partial = PartialOutputs {
            metadata: None,
            pricing: None,
            authenticity: Some(AuthenticityResult::unverified_zero("test")),
        };
        persistor
            .persist_failure(
                &ctx,
                Stage::Aggregate,
                &Error::not_found("card record"),
                partial,
            )
            .await;

        let record = store.get("owner-1", "card-1").unwrap();
        assert!(record.authenticity.is_some());
        assert!(record.pricing.is_none());
        let last_error = record.last_error.unwrap();
        assert_eq!(last_error.failed_stage, "aggregate");
        assert_eq!(last_error.error_kind, "NotFound");

        let letters = queue.drain().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].partial_stages, vec!["verify_authenticity"]);
    }

    #[tokio::test]
    async fn test_invalid_content_at_extract_hard_deletes() {
        let (persistor, store, objects, queue, ctx) = setup();
        let record = CardRecord::new("owner-1", "card-1", "uploads/owner-1/u-f.jpg", None);
        let front = ObjectRef::new("cards", record.front_key.clone());
        objects.put(front.clone(), vec![1]).await;
        store.create(&record, None).unwrap();

        persistor
            .persist_failure(
                &ctx,
                Stage::ExtractFeatures,
                &Error::invalid_content("moderation label"),
                PartialOutputs::default(),
            )
            .await;

        assert_eq!(
            store.get("owner-1", "card-1").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(!objects.contains(&front).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_content_elsewhere_does_not_delete() {
        let (persistor, store, _, _, ctx) = setup();
        store
            .create(
                &CardRecord::new("owner-1", "card-1", "uploads/owner-1/u-f.jpg", None),
                None,
            )
            .unwrap();

        persistor
            .persist_failure(
                &ctx,
                Stage::Aggregate,
                &Error::invalid_content("should not purge"),
                PartialOutputs::default(),
            )
            .await;

        assert!(store.get("owner-1", "card-1").is_ok());
    }

    #[tokio::test]
    async fn test_missing_record_is_tolerated() {
        let (persistor, _, _, queue, ctx) = setup();
        persistor
            .persist_failure(
                &ctx,
                Stage::ExtractFeatures,
                &Error::timeout(30_000),
                PartialOutputs::default(),
            )
            .await;
        assert_eq!(queue.len().await, 1);
    }
}
