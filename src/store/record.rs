//! The persisted card aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authenticity::AuthenticityResult;
use crate::pricing::PricingResult;
use crate::reasoning::CardMetadata;

/// Last failure recorded against a record by the error persistor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub failed_stage: String,
    pub error_kind: String,
    pub error_detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// The persisted card aggregate, identified by `(owner_id, card_id)`.
///
/// A record never changes owners; the gateway keys every write by the
/// owner and refuses cross-tenant access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub owner_id: String,
    pub card_id: String,
    pub front_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Enriched OCR metadata; absent until the pipeline has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_metadata: Option<CardMetadata>,
    /// Valuation triple with provenance; absent until priced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingResult>,
    /// Authenticity score and signals; absent until verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticity: Option<AuthenticityResult>,
    /// Last pipeline failure; cleared on fully clean runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RecordError>,
}

impl CardRecord {
    /// Create a fresh record for a new upload.
    pub fn new(
        owner_id: impl Into<String>,
        card_id: impl Into<String>,
        front_key: impl Into<String>,
        back_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            owner_id: owner_id.into(),
            card_id: card_id.into(),
            front_key: front_key.into(),
            back_key,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            ocr_metadata: None,
            pricing: None,
            authenticity: None,
            last_error: None,
        }
    }

    /// Whether the record is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_record_has_empty_sections() {
        let record = CardRecord::new("owner-1", "card-1", "uploads/owner-1/u-f.jpg", None);
        assert!(record.ocr_metadata.is_none());
        assert!(record.pricing.is_none());
        assert!(record.authenticity.is_none());
        assert!(record.last_error.is_none());
        assert!(!record.is_deleted());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = CardRecord::new(
            "owner-1",
            "card-1",
            "uploads/owner-1/u-f.jpg",
            Some("uploads/owner-1/u-b.jpg".to_string()),
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: CardRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
