//! Feature extraction pipeline.
//!
//! Fetch, decode, moderate, validate, crop, analyze, read text. Rejections
//! from moderation and card-type validation are `InvalidContent` and are
//! never retried; the boundary detector only ever degrades to the full
//! frame.

use image::imageops;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::objects::{verify_key_owner, ObjectRef, ObjectStore};

use super::analysis::{border_metrics, font_metrics, holo_variance, image_quality};
use super::backend::VisionBackend;
use super::boundary::detect_card_boundary;
use super::envelope::{ExtractedFeatures, FeatureEnvelope, ImageMetadata};
use super::moderation::{check_card_type, check_moderation, has_reflective_label};

/// Runs the extraction pipeline for one execution.
pub struct FeatureExtractor {
    objects: Arc<dyn ObjectStore>,
    backend: Arc<dyn VisionBackend>,
}

impl FeatureExtractor {
    /// Create an extractor over pooled clients.
    pub fn new(objects: Arc<dyn ObjectStore>, backend: Arc<dyn VisionBackend>) -> Self {
        Self { objects, backend }
    }

    /// Produce envelopes for the front image and, when present, the back.
    ///
    /// The two images run the full pipeline independently; their envelopes
    /// never merge.
    pub async fn extract_all(
        &self,
        owner_id: &str,
        front: &ObjectRef,
        back: Option<&ObjectRef>,
    ) -> Result<ExtractedFeatures> {
        let front_envelope = self.extract(owner_id, front).await?;
        let back_envelope = match back {
            Some(object) => Some(self.extract(owner_id, object).await?),
            None => None,
        };
        Ok(ExtractedFeatures {
            front: front_envelope,
            back: back_envelope,
        })
    }

    /// Produce a `FeatureEnvelope` from a single object reference.
    pub async fn extract(&self, owner_id: &str, object: &ObjectRef) -> Result<FeatureEnvelope> {
        verify_key_owner(&object.key, owner_id)?;

        let bytes = self.objects.get(object).await?;

        let format = image::guess_format(&bytes)
            .map_err(|e| Error::InvalidImage(format!("unrecognized format: {}", e)))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| Error::InvalidImage(format!("decode failed: {}", e)))?;

        let metadata = ImageMetadata {
            width: decoded.width(),
            height: decoded.height(),
            format: format!("{:?}", format).to_ascii_lowercase(),
            size_bytes: bytes.len() as u64,
        };

        let moderation_labels = self.backend.detect_moderation_labels(&bytes).await?;
        check_moderation(&moderation_labels)?;

        let labels = self.backend.detect_labels(&bytes).await?;
        check_card_type(&labels)?;

        let gray = decoded.to_luma8();
        let boundary = detect_card_boundary(&gray);
        if let Some(warning) = &boundary.warning {
            tracing::warn!(key = %object.key, warning, "card boundary outside typical band");
        }

        let cropped_gray = imageops::crop_imm(
            &gray,
            boundary.x,
            boundary.y,
            boundary.width,
            boundary.height,
        )
        .to_image();
        let rgb = decoded.to_rgb8();
        let cropped_rgb = imageops::crop_imm(
            &rgb,
            boundary.x,
            boundary.y,
            boundary.width,
            boundary.height,
        )
        .to_image();

        let borders = border_metrics(&cropped_gray);
        let holo = holo_variance(&cropped_rgb, has_reflective_label(&labels));
        let quality = image_quality(&cropped_gray);

        let blocks = self.backend.detect_text(&bytes).await?;
        for block in &blocks {
            block.validate()?;
        }
        let fonts = font_metrics(&blocks);

        Ok(FeatureEnvelope {
            blocks,
            borders,
            holo_variance: holo,
            fonts,
            quality,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::ErrorKind;
    use crate::objects::MemoryObjectStore;
    use crate::vision::backend::DetectedLabel;
    use crate::vision::envelope::{BoundingBox, OcrBlock};
    use async_trait::async_trait;
    use image::{Luma, Rgb, RgbImage};
    use std::io::Cursor;

    struct FakeBackend {
        labels: Vec<DetectedLabel>,
        moderation: Vec<DetectedLabel>,
        blocks: Vec<OcrBlock>,
    }

    #[async_trait]
    impl VisionBackend for FakeBackend {
        async fn detect_labels(&self, _image: &[u8]) -> Result<Vec<DetectedLabel>> {
            Ok(self.labels.clone())
        }

        async fn detect_moderation_labels(&self, _image: &[u8]) -> Result<Vec<DetectedLabel>> {
            Ok(self.moderation.clone())
        }

        async fn detect_text(&self, _image: &[u8]) -> Result<Vec<OcrBlock>> {
            Ok(self.blocks.clone())
        }
    }

    fn card_png() -> Vec<u8> {
        let mut rgb = RgbImage::from_pixel(120, 168, Rgb([235, 235, 235]));
        for y in 14..154 {
            for x in 10..110 {
                rgb.put_pixel(x, y, Rgb([60, 60, 70]));
            }
        }
        let mut bytes = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn card_backend() -> FakeBackend {
        FakeBackend {
            labels: vec![
                DetectedLabel::new("Card", 0.92),
                DetectedLabel::new("Text", 0.88),
            ],
            moderation: vec![],
            blocks: vec![OcrBlock::line(
                "Charizard",
                0.97,
                BoundingBox {
                    left: 0.1,
                    top: 0.05,
                    width: 0.5,
                    height: 0.06,
                },
            )],
        }
    }

    async fn extractor_with(
        backend: FakeBackend,
        key: &str,
        bytes: Vec<u8>,
    ) -> (FeatureExtractor, ObjectRef) {
        let store = Arc::new(MemoryObjectStore::new(&PipelineConfig::default()));
        let object = ObjectRef::new("cards", key);
        store.put(object.clone(), bytes).await;
        (FeatureExtractor::new(store, Arc::new(backend)), object)
    }

    #[tokio::test]
    async fn test_extract_happy_path() {
        let (extractor, object) =
            extractor_with(card_backend(), "uploads/owner-1/u-scan.png", card_png()).await;

        let envelope = extractor.extract("owner-1", &object).await.unwrap();
        assert_eq!(envelope.metadata.format, "png");
        assert_eq!(envelope.metadata.width, 120);
        assert_eq!(envelope.blocks.len(), 1);
        assert_eq!(envelope.holo_variance, 0.0);
        assert!(envelope.borders.symmetry_score > 0.9);
    }

    #[tokio::test]
    async fn test_extract_refuses_cross_tenant_key() {
        let (extractor, object) =
            extractor_with(card_backend(), "uploads/owner-2/u-scan.png", card_png()).await;

        let err = extractor.extract("owner-1", &object).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_extract_rejects_undecodable_bytes() {
        let (extractor, object) = extractor_with(
            card_backend(),
            "uploads/owner-1/u-noise.png",
            vec![0u8; 64],
        )
        .await;

        let err = extractor.extract("owner-1", &object).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_extract_rejects_moderated_content() {
        let mut backend = card_backend();
        backend.moderation = vec![DetectedLabel::new("Violence", 0.8)];
        let (extractor, object) =
            extractor_with(backend, "uploads/owner-1/u-scan.png", card_png()).await;

        let err = extractor.extract("owner-1", &object).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContent);
    }

    #[tokio::test]
    async fn test_extract_rejects_non_card_subject() {
        let backend = FakeBackend {
            labels: vec![DetectedLabel::new("Person", 0.95)],
            moderation: vec![],
            blocks: vec![],
        };
        let (extractor, object) =
            extractor_with(backend, "uploads/owner-1/u-selfie.png", card_png()).await;

        let err = extractor.extract("owner-1", &object).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContent);
    }

    #[tokio::test]
    async fn test_extract_all_processes_back_independently() {
        let store = Arc::new(MemoryObjectStore::new(&PipelineConfig::default()));
        let front = ObjectRef::new("cards", "uploads/owner-1/u-front.png");
        let back = ObjectRef::new("cards", "uploads/owner-1/u-back.png");
        store.put(front.clone(), card_png()).await;
        store.put(back.clone(), card_png()).await;
        let extractor = FeatureExtractor::new(store, Arc::new(card_backend()));

        let features = extractor
            .extract_all("owner-1", &front, Some(&back))
            .await
            .unwrap();
        assert!(features.back.is_some());
        assert_eq!(features.front, features.back.unwrap());
    }
}
