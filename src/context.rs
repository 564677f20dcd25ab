//! Per-execution stage context.
//!
//! A small value injected into every stage entry point instead of
//! process-wide state: the correlation key, the tenant coordinates, and the
//! execution deadline. Cloning is cheap; stages never mutate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Correlation and tenancy context for one pipeline execution.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Single correlation key propagated through every stage's logs.
    pub request_id: String,
    /// Tenant that owns the card under valuation.
    pub owner_id: String,
    /// Card under valuation.
    pub card_id: String,
    /// Wall-clock start of the execution.
    pub started_at: DateTime<Utc>,
    /// Monotonic start used for deadline arithmetic.
    started: Instant,
    /// Per-execution deadline.
    deadline: Duration,
}

impl StageContext {
    /// Create a context for a new execution.
    pub fn new(
        request_id: impl Into<String>,
        owner_id: impl Into<String>,
        card_id: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            owner_id: owner_id.into(),
            card_id: card_id.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            deadline,
        }
    }

    /// Time left before the execution deadline, zero when already past it.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.started.elapsed())
    }

    /// Whether the execution deadline has elapsed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Elapsed execution time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Cap a stage deadline at the remaining execution budget.
    pub fn stage_deadline(&self, stage_ms: u64) -> Duration {
        Duration::from_millis(stage_ms).min(self.remaining())
    }
}

/// The five pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExtractFeatures,
    ReasonOcr,
    PriceCard,
    VerifyAuthenticity,
    Aggregate,
}

impl Stage {
    /// Stable name used in logs, telemetry, and dead letters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractFeatures => "extract_features",
            Self::ReasonOcr => "reason_ocr",
            Self::PriceCard => "price_card",
            Self::VerifyAuthenticity => "verify_authenticity",
            Self::Aggregate => "aggregate",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal state of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    /// Every stage completed, possibly via fallback substitutions.
    Success,
    /// The execution failed but partial outputs were persisted.
    Partial,
    /// The execution failed with nothing persisted.
    Failed,
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_counts_down() {
        let ctx = StageContext::new("req-1", "owner-1", "card-1", Duration::from_secs(120));
        assert!(!ctx.is_expired());
        assert!(ctx.remaining() <= Duration::from_secs(120));
    }

    #[test]
    fn test_zero_deadline_is_expired() {
        let ctx = StageContext::new("req-1", "owner-1", "card-1", Duration::ZERO);
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_stage_deadline_capped_by_execution_budget() {
        let ctx = StageContext::new("req-1", "owner-1", "card-1", Duration::from_millis(50));
        assert!(ctx.stage_deadline(30_000) <= Duration::from_millis(50));
    }
}
