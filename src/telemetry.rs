//! Stage telemetry.
//!
//! Every stage emits a `StageReport` with its latency, attempt count, and
//! terminal status; the reasoning and pricing stages add token counts and
//! confidence. Reports accumulate on the execution and are exposed to
//! callers for dashboards and replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of a single stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Stage produced its real output.
    Ok,
    /// Stage substituted its fallback value after exhausting its budget.
    Fallback,
    /// Stage failed and the execution took the catch path.
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fallback => write!(f, "fallback"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Telemetry record for one stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name, e.g. "extract_features".
    pub stage: String,
    /// Wall-clock latency of the stage including retries.
    pub stage_latency_ms: u64,
    /// Attempts made (>= 1).
    pub attempt_count: u32,
    /// Terminal status.
    pub terminal_status: StageStatus,
    /// LLM input tokens consumed, when the stage made LLM calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_input_tokens: Option<u64>,
    /// LLM output tokens consumed, when the stage made LLM calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_output_tokens: Option<u64>,
    /// Overall confidence of the stage output, when it carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
    /// Whether the fallback path was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
    /// When the report was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl StageReport {
    /// Create a report with the required fields.
    pub fn new(
        stage: impl Into<String>,
        stage_latency_ms: u64,
        attempt_count: u32,
        terminal_status: StageStatus,
    ) -> Self {
        Self {
            stage: stage.into(),
            stage_latency_ms,
            attempt_count,
            terminal_status,
            llm_input_tokens: None,
            llm_output_tokens: None,
            overall_confidence: None,
            fallback_used: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach LLM token counts.
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.llm_input_tokens = Some(input);
        self.llm_output_tokens = Some(output);
        self
    }

    /// Attach the output confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.overall_confidence = Some(confidence);
        self
    }

    /// Mark whether the fallback path was taken.
    pub fn with_fallback_used(mut self, used: bool) -> Self {
        self.fallback_used = Some(used);
        self
    }
}

/// Accumulated stage reports for one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTrace {
    reports: Vec<StageReport>,
}

impl ExecutionTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage report.
    pub fn record(&mut self, report: StageReport) {
        self.reports.push(report);
    }

    /// All reports in recording order.
    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    /// Report for a named stage, if recorded.
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == name)
    }

    /// Names of stages that completed with a real output.
    pub fn succeeded_stages(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| r.terminal_status == StageStatus::Ok)
            .map(|r| r.stage.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_builders() {
        let report = StageReport::new("reason_ocr", 812, 2, StageStatus::Ok)
            .with_tokens(1500, 420)
            .with_confidence(0.91)
            .with_fallback_used(false);

        assert_eq!(report.llm_input_tokens, Some(1500));
        assert_eq!(report.overall_confidence, Some(0.91));
        assert_eq!(report.fallback_used, Some(false));
    }

    #[test]
    fn test_trace_lookup_and_succeeded() {
        let mut trace = ExecutionTrace::new();
        trace.record(StageReport::new("extract_features", 100, 1, StageStatus::Ok));
        trace.record(StageReport::new("reason_ocr", 50, 3, StageStatus::Fallback));

        assert!(trace.stage("extract_features").is_some());
        assert!(trace.stage("price_card").is_none());
        assert_eq!(trace.succeeded_stages(), vec!["extract_features"]);
    }
}
