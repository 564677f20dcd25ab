//! Authenticity verification: per-signal confidences fused into one score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::StageContext;
use crate::error::{Error, Result};
use crate::llm::{extract_json_payload, LlmInvoker, TokenUsage};
use crate::objects::{ObjectRef, ObjectStore};
use crate::reasoning::CardMetadata;
use crate::vision::FeatureEnvelope;

use super::phash::PerceptualHash;
use super::reference::ReferenceHashTable;

/// Composite weights per signal.
const WEIGHT_VISUAL_HASH: f64 = 0.35;
const WEIGHT_TEXT_MATCH: f64 = 0.25;
const WEIGHT_HOLO_PATTERN: f64 = 0.20;
const WEIGHT_BORDER: f64 = 0.10;
const WEIGHT_FONT: f64 = 0.10;

/// Text-match weights over the name/set/rarity confidences.
const TEXT_WEIGHTS: (f64, f64, f64) = (0.5, 0.3, 0.2);

/// Neutral score when no reference hash exists for the printing.
const NEUTRAL_HASH_SCORE: f64 = 0.5;

/// Font-size variance at which the font signal reaches zero.
const FONT_VARIANCE_THRESHOLD: f64 = 0.005;

/// Composite score below which the card is flagged as fake.
const FAKE_THRESHOLD: f64 = 0.5;

/// Authenticity verdict with its per-signal breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticityResult {
    /// Composite score in [0, 1].
    pub score: f64,
    /// True exactly when the score is below the fake threshold.
    pub fake_detected: bool,
    /// False when the rationale was synthesized without the LLM.
    pub verified_by_ai: bool,
    /// Per-signal scores; always carries at least visualHash, textMatch,
    /// and holoPattern.
    pub signals: BTreeMap<String, f64>,
    pub rationale: String,
}

impl AuthenticityResult {
    /// The substitute result used when the stage exhausts its budget.
    pub fn unverified_zero(rationale: impl Into<String>) -> Self {
        let mut signals = BTreeMap::new();
        signals.insert("visualHash".to_string(), 0.0);
        signals.insert("textMatch".to_string(), 0.0);
        signals.insert("holoPattern".to_string(), 0.0);
        Self {
            score: 0.0,
            fake_detected: true,
            verified_by_ai: false,
            signals,
            rationale: rationale.into(),
        }
    }

    /// Validate the score/flag coupling and the required signal set.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(Error::schema_violation(format!(
                "authenticity score {} out of range",
                self.score
            )));
        }
        if self.score >= FAKE_THRESHOLD && self.fake_detected {
            return Err(Error::schema_violation(
                "fake flag set despite passing score",
            ));
        }
        for required in ["visualHash", "textMatch", "holoPattern"] {
            if !self.signals.contains_key(required) {
                return Err(Error::schema_violation(format!(
                    "missing required signal '{}'",
                    required
                )));
            }
        }
        Ok(())
    }
}

/// Result of the authenticity stage with its telemetry inputs.
#[derive(Debug, Clone)]
pub struct VerifiedStage {
    pub result: AuthenticityResult,
    pub llm_attempts: u32,
    pub usage: TokenUsage,
}

/// Derives a composite authenticity score for an upload.
pub struct AuthenticityAgent {
    objects: Arc<dyn ObjectStore>,
    reference: Arc<ReferenceHashTable>,
    invoker: Arc<LlmInvoker>,
}

impl AuthenticityAgent {
    /// Create an agent over the shared clients and the read-only reference
    /// table.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        reference: Arc<ReferenceHashTable>,
        invoker: Arc<LlmInvoker>,
    ) -> Self {
        Self {
            objects,
            reference,
            invoker,
        }
    }

    /// Verify the upload against visual features and enriched metadata.
    pub async fn verify(
        &self,
        ctx: &StageContext,
        features: &FeatureEnvelope,
        metadata: &CardMetadata,
        image: &ObjectRef,
    ) -> Result<VerifiedStage> {
        let bytes = self.objects.get(image).await?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| Error::InvalidImage(format!("decode failed: {}", e)))?;
        let hash = PerceptualHash::of_image(&decoded);

        let visual_hash = self.visual_hash_signal(metadata, &hash);
        let text_match = text_match_signal(metadata);
        let holo_pattern = holo_pattern_signal(features, metadata);
        let border_consistency = features.borders.symmetry_score;
        let font_validation =
            (1.0 - features.fonts.size_variance / FONT_VARIANCE_THRESHOLD).clamp(0.0, 1.0);

        let score = WEIGHT_VISUAL_HASH * visual_hash
            + WEIGHT_TEXT_MATCH * text_match
            + WEIGHT_HOLO_PATTERN * holo_pattern
            + WEIGHT_BORDER * border_consistency
            + WEIGHT_FONT * font_validation;

        let mut signals = BTreeMap::new();
        signals.insert("visualHash".to_string(), visual_hash);
        signals.insert("textMatch".to_string(), text_match);
        signals.insert("holoPattern".to_string(), holo_pattern);
        signals.insert("borderConsistency".to_string(), border_consistency);
        signals.insert("fontValidation".to_string(), font_validation);

        let (rationale, verified_by_ai, llm_attempts, usage) =
            self.rationale(ctx, &signals, score).await;

        let result = AuthenticityResult {
            score,
            fake_detected: score < FAKE_THRESHOLD,
            verified_by_ai,
            signals,
            rationale,
        };

        tracing::info!(
            request_id = %ctx.request_id,
            owner_id = %ctx.owner_id,
            card_id = %ctx.card_id,
            score = result.score,
            fake_detected = result.fake_detected,
            "authenticity verification complete"
        );

        Ok(VerifiedStage {
            result,
            llm_attempts,
            usage,
        })
    }

    fn visual_hash_signal(&self, metadata: &CardMetadata, hash: &PerceptualHash) -> f64 {
        let set = metadata.set.best_value();
        let number = metadata.collector_number.value.as_deref();
        match (set, number) {
            (Some(set), Some(number)) => self
                .reference
                .best_similarity(set, number, hash)
                .unwrap_or(NEUTRAL_HASH_SCORE),
            _ => NEUTRAL_HASH_SCORE,
        }
    }

    async fn rationale(
        &self,
        ctx: &StageContext,
        signals: &BTreeMap<String, f64>,
        score: f64,
    ) -> (String, bool, u32, TokenUsage) {
        let system = "You explain trading-card authenticity verdicts. You are given \
                      per-signal scores in [0, 1] and the composite. Respond with a single \
                      JSON object: {\"rationale\": string}. Two sentences at most, grounded \
                      only in the provided signals."
            .to_string();
        let lines: Vec<String> = signals
            .iter()
            .map(|(name, value)| format!("- {}: {:.3}", name, value))
            .collect();
        let user = format!(
            "Signals:\n{}\nComposite score: {:.3}\n\nExplain the verdict.",
            lines.join("\n"),
            score
        );

        let (result, attempts) = self.invoker.invoke(&system, &user).await;

        let parsed = result.and_then(|response| {
            let usage = response.usage;
            let value = extract_json_payload(&response.content)?;
            let wire: RationaleWire = serde_json::from_value(value)?;
            Ok((wire.rationale, usage))
        });

        match parsed {
            Ok((rationale, usage)) => (rationale, true, attempts, usage),
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %error,
                    "rationale LLM call failed, synthesizing from signals"
                );
                (
                    synthesize_rationale(signals, score),
                    false,
                    attempts,
                    TokenUsage::default(),
                )
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RationaleWire {
    rationale: String,
}

/// Weighted mean of the name/set/rarity confidences.
fn text_match_signal(metadata: &CardMetadata) -> f64 {
    let (w_name, w_set, w_rarity) = TEXT_WEIGHTS;
    w_name * metadata.name.confidence
        + w_set * metadata.set.best_confidence()
        + w_rarity * metadata.rarity.confidence
}

/// Consistency between the inferred rarity and the measured foil variance.
fn holo_pattern_signal(features: &FeatureEnvelope, metadata: &CardMetadata) -> f64 {
    let holo_variance = features.holo_variance;
    match metadata.rarity.value.as_deref().map(rarity_implies_holo) {
        Some(true) if holo_variance < 0.2 => 0.2,
        Some(false) if holo_variance > 0.5 => 0.3,
        Some(true) => (0.5 + holo_variance).min(1.0),
        Some(false) => 1.0 - holo_variance,
        None => NEUTRAL_HASH_SCORE,
    }
}

fn rarity_implies_holo(rarity: &str) -> bool {
    let lower = rarity.to_ascii_lowercase();
    ["holo", "foil", "secret", "ultra"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn synthesize_rationale(signals: &BTreeMap<String, f64>, score: f64) -> String {
    let strongest = signals
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    let weakest = signals
        .iter()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    match (strongest, weakest) {
        (Some((high_name, high)), Some((low_name, low))) => format!(
            "Composite score {:.2}; strongest signal {} ({:.2}), weakest signal {} ({:.2}).",
            score, high_name, high, low_name, low
        ),
        _ => format!("Composite score {:.2}.", score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};
    use crate::objects::MemoryObjectStore;
    use crate::reasoning::{FieldResult, SetField};
    use crate::vision::{BorderMetrics, FontMetrics, ImageMetadata, ImageQuality};
    use async_trait::async_trait;
    use chrono::Utc;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;

    struct RationaleClient {
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for RationaleClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            if self.fail {
                return Err(Error::timeout(10));
            }
            Ok(CompletionResponse {
                id: "r".to_string(),
                model: "test".to_string(),
                content: r#"{"rationale": "Signals agree with a genuine print."}"#.to_string(),
                usage: TokenUsage {
                    input_tokens: 120,
                    output_tokens: 30,
                },
                timestamp: Utc::now(),
            })
        }

        fn provider(&self) -> &str {
            "rationale"
        }
    }

    fn card_image_bytes() -> Vec<u8> {
        let mut rgb = RgbImage::new(64, 88);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            let v = ((x * 2 + y) % 255) as u8;
            *pixel = Rgb([v, v.wrapping_add(30), v.wrapping_add(60)]);
        }
        let mut bytes = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn metadata(rarity: &str) -> CardMetadata {
        CardMetadata {
            name: FieldResult::present("Charizard".to_string(), 0.95, "top line"),
            rarity: FieldResult::present(rarity.to_string(), 0.9, "symbol"),
            set: SetField::SingleValue(FieldResult::present(
                "Base Set".to_string(),
                0.9,
                "copyright",
            )),
            set_symbol: FieldResult::absent("none"),
            collector_number: FieldResult::present("4/102".to_string(), 0.9, "corner"),
            copyright_run: FieldResult::absent("none"),
            illustrator: FieldResult::absent("none"),
            overall_confidence: 0.9,
            reasoning_trail: "test".to_string(),
            verified_by_ai: true,
        }
    }

    fn features(holo_variance: f64) -> FeatureEnvelope {
        FeatureEnvelope {
            blocks: vec![],
            borders: BorderMetrics {
                top: 0.5,
                bottom: 0.5,
                left: 0.5,
                right: 0.5,
                symmetry_score: 0.95,
            },
            holo_variance,
            fonts: FontMetrics {
                kerning: vec![],
                alignment_score: 1.0,
                size_variance: 0.0004,
            },
            quality: ImageQuality {
                blur_score: 0.6,
                glare_detected: false,
                brightness: 0.5,
            },
            metadata: ImageMetadata {
                width: 64,
                height: 88,
                format: "png".to_string(),
                size_bytes: 5_000,
            },
        }
    }

    async fn agent_with(
        reference: ReferenceHashTable,
        llm_fails: bool,
    ) -> (AuthenticityAgent, ObjectRef) {
        let mut config = PipelineConfig::new("test-model");
        config.llm_retry_base_delay_ms = 1;
        let store = Arc::new(MemoryObjectStore::new(&config));
        let object = ObjectRef::new("cards", "uploads/owner-1/u-front.png");
        store.put(object.clone(), card_image_bytes()).await;
        let invoker = Arc::new(LlmInvoker::new(
            Arc::new(RationaleClient { fail: llm_fails }),
            &config,
        ));
        (
            AuthenticityAgent::new(store, Arc::new(reference), invoker),
            object,
        )
    }

    fn ctx() -> StageContext {
        StageContext::new("req-1", "owner-1", "card-1", Duration::from_secs(120))
    }

    #[tokio::test]
    async fn test_matching_reference_scores_high() {
        let bytes = card_image_bytes();
        let decoded = image::load_from_memory(&bytes).unwrap();
        let known = PerceptualHash::of_image(&decoded);
        let reference = ReferenceHashTable::from_entries([(
            "Base Set".to_string(),
            "4/102".to_string(),
            known,
        )]);

        let (agent, object) = agent_with(reference, false).await;
        let stage = agent
            .verify(&ctx(), &features(0.45), &metadata("Holo Rare"), &object)
            .await
            .unwrap();

        let result = &stage.result;
        assert!(result.score >= 0.85, "score {}", result.score);
        assert!(!result.fake_detected);
        assert!(result.verified_by_ai);
        assert_eq!(result.signals["visualHash"], 1.0);
        assert!(result.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_reference_is_neutral() {
        let (agent, object) = agent_with(ReferenceHashTable::new(), false).await;
        let stage = agent
            .verify(&ctx(), &features(0.45), &metadata("Holo Rare"), &object)
            .await
            .unwrap();

        assert_eq!(stage.result.signals["visualHash"], NEUTRAL_HASH_SCORE);
    }

    #[tokio::test]
    async fn test_flat_holo_on_holo_rarity_is_suspicious() {
        let (agent, object) = agent_with(ReferenceHashTable::new(), false).await;
        let stage = agent
            .verify(&ctx(), &features(0.05), &metadata("Holo Rare"), &object)
            .await
            .unwrap();

        assert_eq!(stage.result.signals["holoPattern"], 0.2);
    }

    #[tokio::test]
    async fn test_strong_foil_on_common_is_suspicious() {
        let (agent, object) = agent_with(ReferenceHashTable::new(), false).await;
        let stage = agent
            .verify(&ctx(), &features(0.7), &metadata("Common"), &object)
            .await
            .unwrap();

        assert_eq!(stage.result.signals["holoPattern"], 0.3);
    }

    #[tokio::test]
    async fn test_rationale_fallback_is_synthesized() {
        let (agent, object) = agent_with(ReferenceHashTable::new(), true).await;
        let stage = agent
            .verify(&ctx(), &features(0.45), &metadata("Holo Rare"), &object)
            .await
            .unwrap();

        assert!(!stage.result.verified_by_ai);
        assert!(stage.result.rationale.contains("strongest signal"));
        assert!(stage.result.validate().is_ok());
    }

    #[test]
    fn test_unverified_zero_validates() {
        let result = AuthenticityResult::unverified_zero("stage budget exhausted");
        assert!(result.validate().is_ok());
        assert!(result.fake_detected);
        assert!(!result.verified_by_ai);
    }

    #[test]
    fn test_validate_rejects_inconsistent_flag() {
        let mut result = AuthenticityResult::unverified_zero("x");
        result.score = 0.8;
        assert!(result.validate().is_err());
    }

    #[test]
    fn test_rarity_holo_markers() {
        assert!(rarity_implies_holo("Holo Rare"));
        assert!(rarity_implies_holo("Ultra Rare"));
        assert!(!rarity_implies_holo("Common"));
    }
}
