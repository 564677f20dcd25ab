//! LLM envelope: client seam, deterministic invoker, response cache.
//!
//! Every AI-reasoning stage shares one `LlmInvoker`, which pins the model
//! and temperature band, retries transient provider failures, enforces the
//! call-level timeout, bounds in-flight requests, and accounts tokens.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardiq_core::llm::{AnthropicClient, LlmClientConfig, LlmInvoker};
//!
//! let client = Arc::new(AnthropicClient::new(LlmClientConfig::new(api_key))?);
//! let invoker = LlmInvoker::new(client, &config);
//! let (result, attempts) = invoker.invoke(&system_prompt, &user_prompt).await;
//! ```

mod cache;
mod client;
mod invoker;
mod types;

pub use cache::{ResponseCache, ResponseCacheKey, ResponseCacheStats};
pub use client::{AnthropicClient, LlmClient, LlmClientConfig};
pub use invoker::{extract_json_payload, InFlightGate, LlmInvoker};
pub use types::{CompletionRequest, CompletionResponse, TokenUsage};
