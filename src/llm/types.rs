//! Request/response types for the LLM envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deterministic completion request: one system prompt, one user prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model override; the invoker substitutes the configured model when absent.
    pub model: Option<String>,
    /// System prompt fixing role, output schema, and confidence bands.
    pub system: String,
    /// User prompt carrying the stage's structured inputs.
    pub user: String,
    /// Sampling temperature; the invoker clamps to the configured band.
    pub temperature: Option<f64>,
    /// Output token bound; the invoker substitutes the configured bound when absent.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a request from a system and user prompt.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: None,
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the output token bound.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Sum two usage records.
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
        }
    }
}

/// A completion returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Provider-assigned response id.
    pub id: String,
    /// Model that produced the completion.
    pub model: String,
    /// Concatenated text content.
    pub content: String,
    /// Token usage for the call.
    pub usage: TokenUsage,
    /// When the response was received.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("system", "user")
            .with_model("claude-3-5-haiku")
            .with_temperature(0.1)
            .with_max_tokens(4096);

        assert_eq!(request.model.as_deref(), Some("claude-3-5-haiku"));
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_tokens, Some(4096));
    }

    #[test]
    fn test_usage_add() {
        let a = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        };
        let b = TokenUsage {
            input_tokens: 50,
            output_tokens: 5,
        };
        assert_eq!(
            a.add(&b),
            TokenUsage {
                input_tokens: 150,
                output_tokens: 25
            }
        );
    }
}
