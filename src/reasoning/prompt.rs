//! Prompt construction for OCR reasoning.
//!
//! The system prompt fixes the analyst role, the output schema, and the
//! confidence-band semantics; the user prompt groups OCR blocks by vertical
//! region and quantifies the visual context. Both are deterministic
//! functions of the OCR context, which makes response caching sound.

use serde::{Deserialize, Serialize};

use crate::vision::{ImageQuality, OcrBlock};

use super::metadata::CardHints;

/// Visual scalars the reasoner may lean on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualContext {
    pub holo_variance: f64,
    pub border_symmetry: f64,
    pub quality: ImageQuality,
}

/// Full input to a reasoning call.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrContext {
    pub blocks: Vec<OcrBlock>,
    pub visual: VisualContext,
    pub hints: Option<CardHints>,
}

/// Vertical region boundaries.
const TOP_BOUNDARY: f64 = 0.3;
const BOTTOM_BOUNDARY: f64 = 0.7;

/// System prompt: role, constraints, output schema, confidence bands.
pub fn build_system_prompt() -> String {
    r#"You are an expert trading-card analyst. You identify cards from OCR text and visual measurements alone. You never consult external sources, databases, or price guides; everything you conclude must follow from the provided context.

Respond with a single JSON object and nothing else, using exactly this schema:
{
  "name": {"value": string|null, "confidence": number, "rationale": string},
  "rarity": {"value": string|null, "confidence": number, "rationale": string},
  "set": {"value": string|null, "confidence": number, "rationale": string}
         OR {"value": string|null, "candidates": [{"value": string, "confidence": number}, ...], "rationale": string},
  "setSymbol": {"value": string|null, "confidence": number, "rationale": string},
  "collectorNumber": {"value": string|null, "confidence": number, "rationale": string},
  "copyrightRun": {"value": string|null, "confidence": number, "rationale": string},
  "illustrator": {"value": string|null, "confidence": number, "rationale": string},
  "overallConfidence": number,
  "reasoningTrail": string
}

Use the "candidates" form for "set" only when more than one set is plausible; sort candidates by descending confidence and set "value" to the top candidate.

Confidence bands:
- 0.9-1.0: exact, unambiguous evidence
- 0.7-0.9: strong evidence
- 0.5-0.7: moderate evidence
- 0.3-0.5: weak evidence
- below 0.3: treat the field as absent (value null)

Correct obvious OCR misreads (substituted or dropped characters) and say so in the field rationale, citing the original text. Every rationale must be non-empty."#
        .to_string()
}

/// User prompt: region-grouped OCR blocks plus quantified visual context.
pub fn build_user_prompt(context: &OcrContext) -> String {
    let mut top = Vec::new();
    let mut middle = Vec::new();
    let mut bottom = Vec::new();

    for block in &context.blocks {
        let entry = format!(
            "- \"{}\" (confidence {:.2}, {:?} at y={:.2})",
            block.text,
            block.confidence,
            block.block_type,
            block.bbox.top
        );
        let y = block.bbox.center_y();
        if y < TOP_BOUNDARY {
            top.push(entry);
        } else if y < BOTTOM_BOUNDARY {
            middle.push(entry);
        } else {
            bottom.push(entry);
        }
    }

    let section = |name: &str, entries: &[String]| -> String {
        if entries.is_empty() {
            format!("{}:\n(none)\n", name)
        } else {
            format!("{}:\n{}\n", name, entries.join("\n"))
        }
    };

    let mut prompt = String::new();
    prompt.push_str("OCR blocks grouped by vertical region.\n\n");
    prompt.push_str(&section("TOP REGION (y < 0.3)", &top));
    prompt.push('\n');
    prompt.push_str(&section("MIDDLE REGION (0.3 <= y < 0.7)", &middle));
    prompt.push('\n');
    prompt.push_str(&section("BOTTOM REGION (y >= 0.7)", &bottom));

    prompt.push_str(&format!(
        "\nVisual context:\n- holo variance: {:.3} (0 = flat, 1 = strong foil)\n- border symmetry: {:.3}\n- blur score: {:.3}\n- brightness: {:.3}\n- glare: {}\n",
        context.visual.holo_variance,
        context.visual.border_symmetry,
        context.visual.quality.blur_score,
        context.visual.quality.brightness,
        context.visual.quality.glare_detected,
    ));

    if let Some(hints) = context.hints.as_ref().filter(|h| !h.is_empty()) {
        prompt.push_str("\nUploader-supplied hints (unverified, weigh accordingly):\n");
        if let Some(name) = &hints.name {
            prompt.push_str(&format!("- name: {}\n", name));
        }
        if let Some(set) = &hints.set {
            prompt.push_str(&format!("- set: {}\n", set));
        }
        if let Some(number) = &hints.number {
            prompt.push_str(&format!("- number: {}\n", number));
        }
        if let Some(rarity) = &hints.rarity {
            prompt.push_str(&format!("- rarity: {}\n", rarity));
        }
        if let Some(condition) = &hints.condition {
            prompt.push_str(&format!("- condition: {}\n", condition));
        }
    }

    prompt.push_str("\nIdentify the card and fill the schema.");
    prompt
}
