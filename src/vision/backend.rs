//! Vision service seam.
//!
//! OCR, label detection, and content moderation come from an external
//! vision service; the extractor only sees this trait. Implementations must
//! be pooled and thread-safe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::envelope::OcrBlock;

/// A label detected on an image, with its confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f64,
}

impl DetectedLabel {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// External vision service operations used by the feature extractor.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Detect object/scene labels on the image.
    async fn detect_labels(&self, image: &[u8]) -> Result<Vec<DetectedLabel>>;

    /// Detect moderation labels on the image.
    async fn detect_moderation_labels(&self, image: &[u8]) -> Result<Vec<DetectedLabel>>;

    /// Detect LINE and WORD text blocks with normalized bounding boxes.
    async fn detect_text(&self, image: &[u8]) -> Result<Vec<OcrBlock>>;
}
