//! Pipeline configuration.
//!
//! One immutable `PipelineConfig` value is built at startup and shared by
//! every stage. Stages read it; nothing mutates it after construction.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default per-execution deadline in milliseconds.
pub const DEFAULT_EXECUTION_DEADLINE_MS: u64 = 120_000;

/// Default presign size cap in bytes (12 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 12 * 1024 * 1024;

/// Default delete behavior for user-initiated deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Set `deleted_at`, keep the record and its objects.
    Soft,
    /// Remove the record and delete the referenced image objects.
    Hard,
}

/// Per-stage hard deadlines in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDeadlines {
    pub extract_ms: u64,
    pub reason_ms: u64,
    pub price_ms: u64,
    pub authenticity_ms: u64,
    pub aggregate_ms: u64,
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self {
            extract_ms: 30_000,
            reason_ms: 30_000,
            price_ms: 45_000,
            authenticity_ms: 30_000,
            aggregate_ms: 10_000,
        }
    }
}

/// Configuration for the valuation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identifier passed to the LLM service.
    pub llm_model_id: String,
    /// Sampling temperature; clamped to [0.1, 0.2] on build.
    pub llm_temperature: f64,
    /// Upper bound on LLM output tokens.
    pub llm_max_tokens: u32,
    /// Retry count for LLM calls.
    pub llm_max_retries: u32,
    /// Base delay for LLM retries; exponential with multiplier 2.0.
    pub llm_retry_base_delay_ms: u64,
    /// LLM call-level timeout.
    pub llm_call_timeout_ms: u64,
    /// Presign size cap in bytes.
    pub max_upload_size: u64,
    /// Allowed upload MIME types.
    pub upload_allowed_mime: Vec<String>,
    /// Default delete behavior.
    pub delete_mode: DeleteMode,
    /// Market-adapter identifiers to fan out to.
    pub adapters_enabled: HashSet<String>,
    /// Market-adapter call-level timeout.
    pub adapter_call_timeout_ms: u64,
    /// Per-execution deadline.
    pub execution_deadline_ms: u64,
    /// Per-stage hard deadlines.
    pub stage_deadlines: StageDeadlines,
    /// Whether the reasoner consults the LLM response cache.
    pub llm_response_cache: bool,
    /// Bounded in-flight request limit per external client.
    pub max_in_flight: usize,
    /// Queue bound over the in-flight limit; overflow fails fast as Throttled.
    pub max_queued: usize,
}

impl PipelineConfig {
    /// Create a configuration for the given model with design defaults.
    pub fn new(llm_model_id: impl Into<String>) -> Self {
        Self {
            llm_model_id: llm_model_id.into(),
            llm_temperature: 0.1,
            llm_max_tokens: 4096,
            llm_max_retries: 3,
            llm_retry_base_delay_ms: 1_000,
            llm_call_timeout_ms: 20_000,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            upload_allowed_mime: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/heic".to_string(),
            ],
            delete_mode: DeleteMode::Soft,
            adapters_enabled: ["auction_feed", "marketplace", "price_history"]
                .into_iter()
                .map(String::from)
                .collect(),
            adapter_call_timeout_ms: 10_000,
            execution_deadline_ms: DEFAULT_EXECUTION_DEADLINE_MS,
            stage_deadlines: StageDeadlines::default(),
            llm_response_cache: false,
            max_in_flight: 32,
            max_queued: 64,
        }
    }

    /// Set the sampling temperature. Values outside [0.1, 0.2] are clamped.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.llm_temperature = temperature.clamp(0.1, 0.2);
        self
    }

    /// Set the LLM retry budget.
    pub fn with_llm_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.llm_max_retries = max_retries;
        self.llm_retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Set the per-execution deadline.
    pub fn with_execution_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.execution_deadline_ms = deadline_ms;
        self
    }

    /// Set the default delete behavior.
    pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = mode;
        self
    }

    /// Replace the enabled market-adapter set.
    pub fn with_adapters(mut self, adapters: impl IntoIterator<Item = String>) -> Self {
        self.adapters_enabled = adapters.into_iter().collect();
        self
    }

    /// Enable the LLM response cache (7-day TTL).
    pub fn with_response_cache(mut self, enabled: bool) -> Self {
        self.llm_response_cache = enabled;
        self
    }

    /// Per-execution deadline as a `Duration`.
    pub fn execution_deadline(&self) -> Duration {
        Duration::from_millis(self.execution_deadline_ms)
    }

    /// Whether the given MIME type may be uploaded.
    pub fn mime_allowed(&self, mime: &str) -> bool {
        self.upload_allowed_mime.iter().any(|m| m == mime)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new("claude-3-5-sonnet-20241022")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_design_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.llm_max_tokens, 4096);
        assert_eq!(config.llm_max_retries, 3);
        assert_eq!(config.execution_deadline_ms, 120_000);
        assert_eq!(config.max_upload_size, 12 * 1024 * 1024);
        assert_eq!(config.stage_deadlines.price_ms, 45_000);
        assert_eq!(config.adapters_enabled.len(), 3);
        assert!(!config.llm_response_cache);
    }

    #[test]
    fn test_temperature_clamped_to_band() {
        assert_eq!(
            PipelineConfig::default().with_temperature(0.9).llm_temperature,
            0.2
        );
        assert_eq!(
            PipelineConfig::default().with_temperature(0.0).llm_temperature,
            0.1
        );
        assert_eq!(
            PipelineConfig::default()
                .with_temperature(0.15)
                .llm_temperature,
            0.15
        );
    }

    #[test]
    fn test_mime_allowlist() {
        let config = PipelineConfig::default();
        assert!(config.mime_allowed("image/jpeg"));
        assert!(config.mime_allowed("image/heic"));
        assert!(!config.mime_allowed("image/gif"));
        assert!(!config.mime_allowed("application/pdf"));
    }
}
