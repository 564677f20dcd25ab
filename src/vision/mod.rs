//! Vision feature extraction.
//!
//! Turns a `(bucket, key)` reference into a `FeatureEnvelope`: OCR blocks,
//! border metrics, holo variance, font metrics, image quality, and decode
//! metadata. Moderation and card-type validation gate the pipeline; the
//! boundary detector crops the card before the pixel analyses run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardiq_core::vision::FeatureExtractor;
//!
//! let extractor = FeatureExtractor::new(objects, backend);
//! let features = extractor.extract_all("owner-1", &front_ref, back_ref.as_ref()).await?;
//! println!("{} OCR blocks", features.front.blocks.len());
//! ```

mod analysis;
mod backend;
mod boundary;
mod envelope;
mod extractor;
mod moderation;

pub use analysis::{border_metrics, font_metrics, holo_variance, image_quality};
pub use backend::{DetectedLabel, VisionBackend};
pub use boundary::{detect_card_boundary, CardBoundary};
pub use envelope::{
    BorderMetrics, BoundingBox, ExtractedFeatures, FeatureEnvelope, FontMetrics, ImageMetadata,
    ImageQuality, OcrBlock, OcrBlockType,
};
pub use extractor::FeatureExtractor;
pub use moderation::{check_card_type, check_moderation, has_reflective_label};
