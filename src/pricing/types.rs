//! Pricing data model. All monetary values are integer USD cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vision::ImageQuality;

/// Condition band a comparable or query is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionBand {
    NearMint,
    Played,
    Damaged,
}

impl ConditionBand {
    /// Parse the loose condition strings market feeds use.
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "near mint" | "near_mint" | "nm" | "mint" | "nm-mt" => Some(Self::NearMint),
            "played" | "lightly played" | "lp" | "mp" | "moderately played" | "excellent"
            | "good" => Some(Self::Played),
            "damaged" | "dmg" | "poor" | "heavily played" | "hp" => Some(Self::Damaged),
            _ => None,
        }
    }
}

/// Estimate the condition band from image-quality signals.
///
/// Sharp, evenly lit scans read as near mint; glare or low blur scores
/// degrade the estimate.
pub fn estimate_condition(quality: &ImageQuality) -> ConditionBand {
    if quality.blur_score < 0.15 || quality.brightness < 0.2 {
        ConditionBand::Damaged
    } else if quality.glare_detected || quality.blur_score < 0.35 {
        ConditionBand::Played
    } else {
        ConditionBand::NearMint
    }
}

/// Query tuple sent to every market adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardQuery {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    pub condition: ConditionBand,
}

/// A historical sale used as pricing evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparable {
    /// Sale price in the source currency's minor units.
    pub price_cents: i64,
    /// ISO currency code as reported by the source.
    pub currency: String,
    /// Condition band as reported by the source, when parseable.
    pub condition: Option<ConditionBand>,
    /// When the sale happened.
    pub sold_at: DateTime<Utc>,
    /// Adapter that contributed this sale.
    pub source: String,
}

/// Price trend over the retained comparables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Narrative summary over the statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSummary {
    /// Fair-value estimate in cents, absent with no data.
    pub fair_value_cents: Option<i64>,
    pub trend: Trend,
    pub confidence: f64,
    pub rationale: String,
}

/// Three-point valuation with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingResult {
    /// 10th percentile in cents.
    pub value_low: Option<i64>,
    /// 50th percentile in cents.
    pub value_median: Option<i64>,
    /// 90th percentile in cents.
    pub value_high: Option<i64>,
    /// Comparables retained after outlier filtering.
    pub comps_count: u64,
    /// Adapters that contributed at least one retained comparable.
    pub sources: Vec<String>,
    pub confidence: f64,
    pub summary: PricingSummary,
}

impl PricingResult {
    /// The null result used when no comparables exist or the stage fell
    /// back: absent percentiles, zero confidence, stable trend.
    pub fn empty(rationale: impl Into<String>) -> Self {
        Self {
            value_low: None,
            value_median: None,
            value_high: None,
            comps_count: 0,
            sources: Vec::new(),
            confidence: 0.0,
            summary: PricingSummary {
                fair_value_cents: None,
                trend: Trend::Stable,
                confidence: 0.0,
                rationale: rationale.into(),
            },
        }
    }

    /// Validate the ordering and confidence invariants.
    pub fn validate(&self) -> crate::error::Result<()> {
        if let (Some(low), Some(median), Some(high)) =
            (self.value_low, self.value_median, self.value_high)
        {
            if !(low <= median && median <= high) {
                return Err(crate::error::Error::schema_violation(format!(
                    "percentiles out of order: {} / {} / {}",
                    low, median, high
                )));
            }
        }
        if self.comps_count == 0 && self.confidence > 0.3 {
            return Err(crate::error::Error::schema_violation(
                "zero comparables with confidence above 0.3",
            ));
        }
        Ok(())
    }
}
