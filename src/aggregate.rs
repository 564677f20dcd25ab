//! Aggregation stage: merge stage outputs into the record and persist.

use chrono::Utc;
use std::sync::Arc;

use crate::authenticity::AuthenticityResult;
use crate::context::StageContext;
use crate::error::Result;
use crate::events::{EventBus, EventEnvelope, ValuationCompletedDetail};
use crate::pricing::PricingResult;
use crate::reasoning::CardMetadata;
use crate::store::{CardRecord, SqliteCardStore};

/// Merges `{metadata, pricing, authenticity}` into the stored record.
pub struct Aggregator {
    store: Arc<SqliteCardStore>,
    events: EventBus,
}

impl Aggregator {
    /// Create an aggregator over the store gateway.
    pub fn new(store: Arc<SqliteCardStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Persist the enriched record and emit `CardValuationCompleted`.
    ///
    /// The caller guarantees all three sections are present (possibly as
    /// fallback substitutions). `clean_run` is true only when no stage fell
    /// back; it gates clearing `last_error`. Conditional-write failures
    /// propagate without retry.
    pub async fn aggregate(
        &self,
        ctx: &StageContext,
        metadata: CardMetadata,
        pricing: PricingResult,
        authenticity: AuthenticityResult,
        clean_run: bool,
    ) -> Result<CardRecord> {
        let mut record = self.store.get(&ctx.owner_id, &ctx.card_id)?;

        let name = metadata.name.value.clone();
        let value_median = pricing.value_median;
        let authenticity_score = authenticity.score;
        let fake_detected = authenticity.fake_detected;

        record.ocr_metadata = Some(metadata);
        record.pricing = Some(pricing);
        record.authenticity = Some(authenticity);
        record.updated_at = Utc::now();
        if clean_run {
            record.last_error = None;
        }

        self.store.update(&record)?;

        self.events
            .emit(EventEnvelope::valuation_completed(ValuationCompletedDetail {
                owner_id: ctx.owner_id.clone(),
                card_id: ctx.card_id.clone(),
                name,
                value_median,
                authenticity_score,
                fake_detected,
                timestamp: record.updated_at,
            }));

        tracing::info!(
            request_id = %ctx.request_id,
            owner_id = %ctx.owner_id,
            card_id = %ctx.card_id,
            value_median = ?value_median,
            authenticity_score,
            "aggregation persisted enriched record"
        );

        Ok(record)
    }
}
