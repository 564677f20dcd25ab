//! Deterministic LLM invocation envelope.
//!
//! Every AI-reasoning stage goes through one `LlmInvoker`: it pins the
//! configured model and temperature band, bounds output tokens, applies the
//! retry policy to transient failures only, enforces the call-level timeout,
//! accounts tokens, and (when enabled) consults the response cache. The
//! invoker is created once and shared across executions.

use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::retry::{retry, with_deadline, RetryPolicy};

use super::cache::{ResponseCache, ResponseCacheKey};
use super::client::LlmClient;
use super::types::{CompletionRequest, CompletionResponse, TokenUsage};

/// Bounded in-flight gate with a fail-fast queue bound.
///
/// Up to `max_in_flight` requests run concurrently; up to `max_queued` more
/// wait. Requests beyond both bounds fail immediately as `Throttled`.
pub struct InFlightGate {
    permits: Arc<Semaphore>,
    queued: AtomicUsize,
    max_queued: usize,
    resource: String,
}

impl InFlightGate {
    /// Create a gate for the named resource.
    pub fn new(resource: impl Into<String>, max_in_flight: usize, max_queued: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            queued: AtomicUsize::new(0),
            max_queued,
            resource: resource.into(),
        }
    }

    /// Acquire a permit, queueing up to the bound.
    pub async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let waiting = self.queued.fetch_add(1, Ordering::SeqCst);
        if waiting >= self.max_queued {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::throttled(self.resource.clone()));
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("in-flight gate closed".to_string()))?;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Ok(permit)
    }
}

/// Shared deterministic invoker over a pooled LLM client.
pub struct LlmInvoker {
    client: Arc<dyn LlmClient>,
    model_id: String,
    temperature: f64,
    max_tokens: u32,
    call_timeout: Duration,
    retry_policy: RetryPolicy,
    gate: InFlightGate,
    cache: Option<ResponseCache>,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl LlmInvoker {
    /// Build an invoker from the pipeline configuration.
    pub fn new(client: Arc<dyn LlmClient>, config: &PipelineConfig) -> Self {
        Self {
            client,
            model_id: config.llm_model_id.clone(),
            temperature: config.llm_temperature.clamp(0.1, 0.2),
            max_tokens: config.llm_max_tokens,
            call_timeout: Duration::from_millis(config.llm_call_timeout_ms),
            retry_policy: RetryPolicy::llm(config.llm_max_retries, config.llm_retry_base_delay_ms),
            gate: InFlightGate::new("llm", config.max_in_flight, config.max_queued),
            cache: config.llm_response_cache.then(ResponseCache::new),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    /// Complete a system/user prompt pair under the deterministic contract.
    ///
    /// Returns the result together with the attempt count actually used; a
    /// cache hit reports zero attempts.
    pub async fn invoke(&self, system: &str, user: &str) -> (Result<CompletionResponse>, u32) {
        let cache_key = ResponseCacheKey::generate(&self.model_id, system, user);
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&cache_key).await {
                return (Ok(cached), 0);
            }
        }

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(error) => return (Err(error), 0),
        };

        let request = CompletionRequest::new(system, user)
            .with_model(self.model_id.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let outcome = retry(&self.retry_policy, |_| {
            let request = request.clone();
            async move { with_deadline(self.call_timeout, self.client.complete(request)).await }
        })
        .await;

        let attempts = outcome.attempts;
        let response = match outcome.result {
            Ok(response) => response,
            Err(error) => return (Err(error), attempts),
        };

        self.input_tokens
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);

        if let Some(cache) = &self.cache {
            cache.put(cache_key, response.clone()).await;
        }

        (Ok(response), attempts)
    }

    /// Tokens accounted across all invocations of this invoker.
    pub fn total_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Extract the JSON payload from a completion.
///
/// Accepts raw JSON, JSON fenced inside a markdown code block, and JSON
/// surrounded by prose. Anything else is `LlmMalformed`.
pub fn extract_json_payload(content: &str) -> Result<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let fence = Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("static fence pattern");
    if let Some(captures) = fence.captures(trimmed) {
        if let Some(inner) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(inner.as_str().trim()) {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(Error::LlmMalformed(format!(
        "no JSON payload in completion ({} chars)",
        content.len()
    )))
}
