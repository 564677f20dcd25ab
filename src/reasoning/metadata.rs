//! Card metadata produced by OCR reasoning.
//!
//! The `set` field is a sum type: a single value when the reasoner is
//! confident, a sorted candidate list when it is not. Every field carries
//! its own confidence and rationale.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One field of card metadata: value, confidence, rationale.
///
/// When the value is absent the confidence must be at most 0.3; the
/// rationale is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct FieldResult<T> {
    pub value: Option<T>,
    pub confidence: f64,
    pub rationale: String,
}

impl<T> FieldResult<T> {
    /// A present value.
    pub fn present(value: T, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            confidence,
            rationale: rationale.into(),
        }
    }

    /// An absent value with zero confidence.
    pub fn absent(rationale: impl Into<String>) -> Self {
        Self {
            value: None,
            confidence: 0.0,
            rationale: rationale.into(),
        }
    }

    fn validate_field(&self, field: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::schema_violation(format!(
                "field '{}' confidence {} out of range",
                field, self.confidence
            )));
        }
        if self.value.is_none() && self.confidence > 0.3 {
            return Err(Error::schema_violation(format!(
                "field '{}' is absent but claims confidence {}",
                field, self.confidence
            )));
        }
        if self.rationale.trim().is_empty() {
            return Err(Error::schema_violation(format!(
                "field '{}' has an empty rationale",
                field
            )));
        }
        Ok(())
    }
}

/// One candidate in a multi-candidate field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CandidateValue<T> {
    pub value: T,
    pub confidence: f64,
}

/// Field variant used when the reasoner returns multiple plausible values.
///
/// Candidates are sorted strictly descending by confidence; a present value
/// must equal the first candidate's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MultiCandidateResult<T> {
    pub value: Option<T>,
    pub candidates: Vec<CandidateValue<T>>,
    pub rationale: String,
}

impl<T: PartialEq + std::fmt::Debug> MultiCandidateResult<T> {
    fn validate_field(&self, field: &str) -> Result<()> {
        if self.rationale.trim().is_empty() {
            return Err(Error::schema_violation(format!(
                "field '{}' has an empty rationale",
                field
            )));
        }
        for candidate in &self.candidates {
            if !(0.0..=1.0).contains(&candidate.confidence) {
                return Err(Error::schema_violation(format!(
                    "field '{}' candidate confidence {} out of range",
                    field, candidate.confidence
                )));
            }
        }
        for pair in self.candidates.windows(2) {
            if pair[1].confidence >= pair[0].confidence {
                return Err(Error::schema_violation(format!(
                    "field '{}' candidates are not strictly descending",
                    field
                )));
            }
        }
        if let Some(value) = &self.value {
            match self.candidates.first() {
                Some(top) if &top.value == value => {}
                _ => {
                    return Err(Error::schema_violation(format!(
                        "field '{}' value {:?} does not match the top candidate",
                        field, value
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The `set` field: a single value or a sorted candidate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SetField {
    /// Multiple plausible sets, sorted by confidence.
    MultiCandidate(MultiCandidateResult<String>),
    /// A single confident value.
    SingleValue(FieldResult<String>),
}

impl SetField {
    /// The best available set name, if any.
    pub fn best_value(&self) -> Option<&str> {
        match self {
            Self::SingleValue(field) => field.value.as_deref(),
            Self::MultiCandidate(multi) => multi
                .value
                .as_deref()
                .or_else(|| multi.candidates.first().map(|c| c.value.as_str())),
        }
    }

    /// Confidence of the best value, zero when absent.
    pub fn best_confidence(&self) -> f64 {
        match self {
            Self::SingleValue(field) => field.confidence,
            Self::MultiCandidate(multi) => {
                multi.candidates.first().map(|c| c.confidence).unwrap_or(0.0)
            }
        }
    }

    fn validate_field(&self, field: &str) -> Result<()> {
        match self {
            Self::SingleValue(single) => single.validate_field(field),
            Self::MultiCandidate(multi) => multi.validate_field(field),
        }
    }
}

fn default_verified() -> bool {
    true
}

/// Structured card metadata with per-field confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CardMetadata {
    pub name: FieldResult<String>,
    pub rarity: FieldResult<String>,
    pub set: SetField,
    pub set_symbol: FieldResult<String>,
    pub collector_number: FieldResult<String>,
    pub copyright_run: FieldResult<String>,
    pub illustrator: FieldResult<String>,
    /// Confidence over the whole reading, in [0, 1].
    pub overall_confidence: f64,
    /// Free-form explanation of the reading.
    pub reasoning_trail: String,
    /// False only when the fallback path produced this metadata.
    #[serde(default = "default_verified")]
    pub verified_by_ai: bool,
}

impl CardMetadata {
    /// Validate every invariant the schema fixes.
    pub fn validate(&self) -> Result<()> {
        self.name.validate_field("name")?;
        self.rarity.validate_field("rarity")?;
        self.set.validate_field("set")?;
        self.set_symbol.validate_field("setSymbol")?;
        self.collector_number.validate_field("collectorNumber")?;
        self.copyright_run.validate_field("copyrightRun")?;
        self.illustrator.validate_field("illustrator")?;
        if !(0.0..=1.0).contains(&self.overall_confidence) {
            return Err(Error::schema_violation(format!(
                "overallConfidence {} out of range",
                self.overall_confidence
            )));
        }
        Ok(())
    }
}

/// Preliminary hints carried on the creation event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl CardHints {
    /// Whether any hint is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.set.is_none()
            && self.number.is_none()
            && self.rarity.is_none()
            && self.condition.is_none()
    }
}

/// How the reasoning stage concluded.
///
/// The orchestrator branches on the variant instead of catching an error:
/// both carry usable metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReasoningOutcome {
    /// The LLM produced schema-valid metadata.
    Reasoned(CardMetadata),
    /// The deterministic fallback substituted reduced-confidence metadata.
    FellBack(CardMetadata),
}

impl ReasoningOutcome {
    /// The metadata, regardless of path.
    pub fn metadata(&self) -> &CardMetadata {
        match self {
            Self::Reasoned(m) | Self::FellBack(m) => m,
        }
    }

    /// Consume into the metadata.
    pub fn into_metadata(self) -> CardMetadata {
        match self {
            Self::Reasoned(m) | Self::FellBack(m) => m,
        }
    }

    /// Whether the fallback path was taken.
    pub fn fallback_used(&self) -> bool {
        matches!(self, Self::FellBack(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_with_set(set: SetField) -> CardMetadata {
        CardMetadata {
            name: FieldResult::present("Charizard".to_string(), 0.95, "top line"),
            rarity: FieldResult::present("Holo Rare".to_string(), 0.9, "star symbol"),
            set,
            set_symbol: FieldResult::absent("no symbol detected"),
            collector_number: FieldResult::present("4/102".to_string(), 0.88, "bottom right"),
            copyright_run: FieldResult::present("© 1999 Nintendo".to_string(), 0.92, "bottom"),
            illustrator: FieldResult::present("Mitsuhiro Arita".to_string(), 0.85, "credit line"),
            overall_confidence: 0.9,
            reasoning_trail: "strong OCR agreement".to_string(),
            verified_by_ai: true,
        }
    }

    #[test]
    fn test_valid_metadata_passes() {
        let metadata = metadata_with_set(SetField::SingleValue(FieldResult::present(
            "Base Set".to_string(),
            0.9,
            "copyright run",
        )));
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_absent_with_high_confidence_rejected() {
        let mut metadata = metadata_with_set(SetField::SingleValue(FieldResult::present(
            "Base Set".to_string(),
            0.9,
            "copyright run",
        )));
        metadata.illustrator = FieldResult {
            value: None,
            confidence: 0.8,
            rationale: "unreadable".to_string(),
        };
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_empty_rationale_rejected() {
        let mut metadata = metadata_with_set(SetField::SingleValue(FieldResult::present(
            "Base Set".to_string(),
            0.9,
            "copyright run",
        )));
        metadata.name.rationale = "  ".to_string();
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_candidates_must_strictly_descend() {
        let descending = SetField::MultiCandidate(MultiCandidateResult {
            value: Some("Base Set".to_string()),
            candidates: vec![
                CandidateValue {
                    value: "Base Set".to_string(),
                    confidence: 0.6,
                },
                CandidateValue {
                    value: "Base Set 2".to_string(),
                    confidence: 0.4,
                },
            ],
            rationale: "ambiguous copyright".to_string(),
        });
        assert!(metadata_with_set(descending).validate().is_ok());

        let tied = SetField::MultiCandidate(MultiCandidateResult {
            value: Some("Base Set".to_string()),
            candidates: vec![
                CandidateValue {
                    value: "Base Set".to_string(),
                    confidence: 0.5,
                },
                CandidateValue {
                    value: "Base Set 2".to_string(),
                    confidence: 0.5,
                },
            ],
            rationale: "ambiguous copyright".to_string(),
        });
        assert!(metadata_with_set(tied).validate().is_err());
    }

    #[test]
    fn test_value_must_match_top_candidate() {
        let mismatched = SetField::MultiCandidate(MultiCandidateResult {
            value: Some("Jungle".to_string()),
            candidates: vec![CandidateValue {
                value: "Base Set".to_string(),
                confidence: 0.6,
            }],
            rationale: "ambiguous".to_string(),
        });
        assert!(metadata_with_set(mismatched).validate().is_err());
    }

    #[test]
    fn test_set_field_untagged_deserialization() {
        let single: SetField = serde_json::from_value(json!({
            "value": "Base Set", "confidence": 0.9, "rationale": "copyright"
        }))
        .unwrap();
        assert!(matches!(single, SetField::SingleValue(_)));

        let multi: SetField = serde_json::from_value(json!({
            "value": "Base Set",
            "candidates": [
                {"value": "Base Set", "confidence": 0.6},
                {"value": "Base Set 2", "confidence": 0.3}
            ],
            "rationale": "no symbol"
        }))
        .unwrap();
        assert!(matches!(multi, SetField::MultiCandidate(_)));
        assert_eq!(multi.best_value(), Some("Base Set"));
    }

    #[test]
    fn test_verified_by_ai_defaults_true_on_wire() {
        let value = json!({
            "name": {"value": "Pikachu", "confidence": 0.9, "rationale": "top line"},
            "rarity": {"value": null, "confidence": 0.1, "rationale": "no symbol"},
            "set": {"value": "Jungle", "confidence": 0.8, "rationale": "symbol"},
            "setSymbol": {"value": null, "confidence": 0.0, "rationale": "none"},
            "collectorNumber": {"value": null, "confidence": 0.0, "rationale": "none"},
            "copyrightRun": {"value": null, "confidence": 0.0, "rationale": "none"},
            "illustrator": {"value": null, "confidence": 0.0, "rationale": "none"},
            "overallConfidence": 0.7,
            "reasoningTrail": "partial read"
        });
        let metadata: CardMetadata = serde_json::from_value(value).unwrap();
        assert!(metadata.verified_by_ai);
    }

    #[test]
    fn test_reasoning_outcome_accessors() {
        let metadata = metadata_with_set(SetField::SingleValue(FieldResult::present(
            "Base Set".to_string(),
            0.9,
            "copyright",
        )));
        let reasoned = ReasoningOutcome::Reasoned(metadata.clone());
        assert!(!reasoned.fallback_used());

        let fell_back = ReasoningOutcome::FellBack(metadata);
        assert!(fell_back.fallback_used());
        assert_eq!(fell_back.metadata().name.value.as_deref(), Some("Charizard"));
    }
}
