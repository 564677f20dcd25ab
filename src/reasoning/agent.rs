//! OCR reasoning agent.
//!
//! Wraps a deterministic LLM call that turns OCR blocks into schema-valid
//! `CardMetadata`. Transport failures are retried inside the invoker;
//! anything terminal (throttled out, timed out, malformed output, schema
//! violation) degrades to the rule-based fallback. The agent itself never
//! fails: downstream stages always receive metadata.

use std::sync::Arc;

use crate::context::StageContext;
use crate::llm::{extract_json_payload, LlmInvoker, TokenUsage};
use crate::vision::{OcrBlock, OcrBlockType};

use super::fuzzy;
use super::metadata::{CardMetadata, FieldResult, ReasoningOutcome, SetField};
use super::prompt::{build_system_prompt, build_user_prompt, OcrContext};

/// Confidence multiplier applied to the raw OCR confidence on the fallback
/// name field.
const FALLBACK_NAME_FACTOR: f64 = 0.7;

/// Overall confidence reported by fallback metadata.
const FALLBACK_OVERALL_CONFIDENCE: f64 = 0.3;

const FALLBACK_RATIONALE: &str = "AI reasoning unavailable";

/// Result of the reasoning stage with its telemetry inputs.
#[derive(Debug, Clone)]
pub struct ReasonedStage {
    pub outcome: ReasoningOutcome,
    pub attempts: u32,
    pub usage: TokenUsage,
}

/// Turns an OCR context into validated card metadata.
pub struct ReasoningAgent {
    invoker: Arc<LlmInvoker>,
}

impl ReasoningAgent {
    /// Create an agent over the shared invoker.
    pub fn new(invoker: Arc<LlmInvoker>) -> Self {
        Self { invoker }
    }

    /// Reason over the OCR context.
    ///
    /// Always produces metadata; the `ReasoningOutcome` variant records
    /// whether the fallback path was taken.
    pub async fn reason(&self, ctx: &StageContext, context: &OcrContext) -> ReasonedStage {
        let system = build_system_prompt();
        let user = build_user_prompt(context);

        let (result, attempts) = self.invoker.invoke(&system, &user).await;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %error,
                    "reasoning LLM call failed, substituting fallback metadata"
                );
                return ReasonedStage {
                    outcome: ReasoningOutcome::FellBack(fallback_metadata(context)),
                    attempts,
                    usage: TokenUsage::default(),
                };
            }
        };

        let usage = response.usage;
        let metadata = extract_json_payload(&response.content)
            .and_then(|value| serde_json::from_value::<CardMetadata>(value).map_err(Into::into))
            .and_then(|metadata| metadata.validate().map(|_| metadata));

        match metadata {
            Ok(metadata) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    overall_confidence = metadata.overall_confidence,
                    "reasoning produced schema-valid metadata"
                );
                ReasonedStage {
                    outcome: ReasoningOutcome::Reasoned(metadata),
                    attempts,
                    usage,
                }
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    owner_id = %ctx.owner_id,
                    card_id = %ctx.card_id,
                    error = %error,
                    "reasoning output failed validation, substituting fallback metadata"
                );
                ReasonedStage {
                    outcome: ReasoningOutcome::FellBack(fallback_metadata(context)),
                    attempts,
                    usage,
                }
            }
        }
    }
}

/// Deterministic reduced-confidence metadata from raw OCR.
///
/// The name is the topmost LINE block at 0.7 of its OCR confidence; every
/// other field is absent. When an uploader hint fuzzy-matches the top line,
/// the hint spelling wins.
pub fn fallback_metadata(context: &OcrContext) -> CardMetadata {
    let topmost = topmost_line(&context.blocks);

    let name = match topmost {
        Some(line) => {
            let hinted = context
                .hints
                .as_ref()
                .and_then(|h| h.name.as_deref())
                .filter(|hint| fuzzy::is_match(&line.text, hint));
            match hinted {
                Some(hint) => FieldResult::present(
                    hint.to_string(),
                    line.confidence * FALLBACK_NAME_FACTOR,
                    format!("topmost OCR line '{}' matched uploader hint", line.text),
                ),
                None => FieldResult::present(
                    line.text.clone(),
                    line.confidence * FALLBACK_NAME_FACTOR,
                    "topmost OCR line",
                ),
            }
        }
        None => FieldResult::absent("no OCR lines detected"),
    };

    CardMetadata {
        name,
        rarity: FieldResult::absent(FALLBACK_RATIONALE),
        set: SetField::SingleValue(FieldResult::absent(FALLBACK_RATIONALE)),
        set_symbol: FieldResult::absent(FALLBACK_RATIONALE),
        collector_number: FieldResult::absent(FALLBACK_RATIONALE),
        copyright_run: FieldResult::absent(FALLBACK_RATIONALE),
        illustrator: FieldResult::absent(FALLBACK_RATIONALE),
        overall_confidence: FALLBACK_OVERALL_CONFIDENCE,
        reasoning_trail: format!("{}; metadata derived from raw OCR", FALLBACK_RATIONALE),
        verified_by_ai: false,
    }
}

fn topmost_line(blocks: &[OcrBlock]) -> Option<&OcrBlock> {
    blocks
        .iter()
        .filter(|b| b.block_type == OcrBlockType::Line)
        .min_by(|a, b| {
            a.bbox
                .top
                .partial_cmp(&b.bbox.top)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
