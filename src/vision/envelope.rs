//! Per-image feature envelope types.
//!
//! A `FeatureEnvelope` is produced once per execution and flows forward
//! through reasoning, pricing, and authenticity. It is never persisted and
//! never shared across executions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of recognized text span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OcrBlockType {
    /// A full detected line.
    Line,
    /// A single word inside a line.
    Word,
}

/// Axis-aligned bounding box with coordinates normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Validate normalization: all coordinates in [0, 1] and sum-respecting.
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(self.left) && in_unit(self.top) && in_unit(self.width) && in_unit(self.height))
        {
            return Err(Error::InvalidInput(format!(
                "bounding box out of unit range: {:?}",
                self
            )));
        }
        if self.left + self.width > 1.0 + f64::EPSILON
            || self.top + self.height > 1.0 + f64::EPSILON
        {
            return Err(Error::InvalidInput(format!(
                "bounding box exceeds image bounds: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Vertical center of the box.
    pub fn center_y(&self) -> f64 {
        self.top + self.height / 2.0
    }
}

/// A recognized span of text with its detection confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrBlock {
    /// Recognized text.
    pub text: String,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Normalized bounding box.
    pub bbox: BoundingBox,
    /// LINE or WORD.
    pub block_type: OcrBlockType,
}

impl OcrBlock {
    /// Create a LINE block.
    pub fn line(text: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
            block_type: OcrBlockType::Line,
        }
    }

    /// Create a WORD block.
    pub fn word(text: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
            block_type: OcrBlockType::Word,
        }
    }

    /// Validate confidence range and box normalization.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidInput(format!(
                "OCR confidence out of range: {}",
                self.confidence
            )));
        }
        self.bbox.validate()
    }
}

/// Brightness ratios of the four 5%-thick border bands plus a symmetry score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BorderMetrics {
    /// Average brightness of the top band divided by 255.
    pub top: f64,
    /// Average brightness of the bottom band divided by 255.
    pub bottom: f64,
    /// Average brightness of the left band divided by 255.
    pub left: f64,
    /// Average brightness of the right band divided by 255.
    pub right: f64,
    /// 1 - mean(|top-bottom|, |left-right|), in [0, 1].
    pub symmetry_score: f64,
}

/// Typography-derived signals from the OCR blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontMetrics {
    /// Inter-word kerning gaps in normalized units, reading order.
    pub kerning: Vec<f64>,
    /// Left/right edge alignment score in [0, 1].
    pub alignment_score: f64,
    /// Variance of block heights.
    pub size_variance: f64,
}

/// Global image-quality signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageQuality {
    /// Grayscale standard deviation / 100, clipped to [0, 1]. Low = blurry.
    pub blur_score: f64,
    /// True when more than 15% of sampled pixels exceed brightness 240/255.
    pub glare_detected: bool,
    /// Mean sampled brightness / 255.
    pub brightness: f64,
}

/// Decode-time metadata of the uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Container format, e.g. "jpeg".
    pub format: String,
    pub size_bytes: u64,
}

/// Full bundle of per-image signals consumed by the downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEnvelope {
    /// OCR blocks in detection order.
    pub blocks: Vec<OcrBlock>,
    pub borders: BorderMetrics,
    /// RGB variance proxy for holographic foil, in [0, 1].
    pub holo_variance: f64,
    pub fonts: FontMetrics,
    pub quality: ImageQuality,
    pub metadata: ImageMetadata,
}

impl FeatureEnvelope {
    /// LINE blocks only, detection order preserved.
    pub fn lines(&self) -> impl Iterator<Item = &OcrBlock> {
        self.blocks
            .iter()
            .filter(|b| b.block_type == OcrBlockType::Line)
    }

    /// The topmost LINE block by bounding-box top edge.
    pub fn topmost_line(&self) -> Option<&OcrBlock> {
        self.lines()
            .min_by(|a, b| a.bbox.top.partial_cmp(&b.bbox.top).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Envelopes for the front image and, when supplied, the back image.
///
/// The two are produced by independent runs of the full pipeline and never
/// merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFeatures {
    pub front: FeatureEnvelope,
    pub back: Option<FeatureEnvelope>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(left: f64, top: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox {
            left,
            top,
            width,
            height,
        }
    }

    #[test]
    fn test_bbox_validation() {
        assert!(bbox(0.1, 0.1, 0.5, 0.5).validate().is_ok());
        assert!(bbox(0.6, 0.0, 0.5, 0.1).validate().is_err());
        assert!(bbox(-0.1, 0.0, 0.5, 0.1).validate().is_err());
        assert!(bbox(0.0, 0.8, 0.2, 0.3).validate().is_err());
    }

    #[test]
    fn test_block_confidence_validation() {
        let good = OcrBlock::line("Charizard", 0.98, bbox(0.1, 0.05, 0.4, 0.06));
        assert!(good.validate().is_ok());

        let bad = OcrBlock::line("Charizard", 1.2, bbox(0.1, 0.05, 0.4, 0.06));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_topmost_line_ignores_words() {
        let envelope = FeatureEnvelope {
            blocks: vec![
                OcrBlock::word("HP", 0.9, bbox(0.7, 0.02, 0.1, 0.04)),
                OcrBlock::line("Charizard", 0.95, bbox(0.1, 0.05, 0.4, 0.06)),
                OcrBlock::line("Fire Spin", 0.92, bbox(0.1, 0.5, 0.4, 0.05)),
            ],
            borders: BorderMetrics {
                top: 0.5,
                bottom: 0.5,
                left: 0.5,
                right: 0.5,
                symmetry_score: 1.0,
            },
            holo_variance: 0.0,
            fonts: FontMetrics {
                kerning: vec![],
                alignment_score: 1.0,
                size_variance: 0.0,
            },
            quality: ImageQuality {
                blur_score: 0.5,
                glare_detected: false,
                brightness: 0.5,
            },
            metadata: ImageMetadata {
                width: 600,
                height: 825,
                format: "jpeg".to_string(),
                size_bytes: 120_000,
            },
        };

        assert_eq!(envelope.topmost_line().unwrap().text, "Charizard");
        assert_eq!(envelope.lines().count(), 2);
    }
}
