//! Error types for cardiq-core.

use thiserror::Error;

/// Result type alias using cardiq-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Policy category an error falls into.
///
/// Stages never branch on concrete error variants; they branch on the
/// category, which fixes retry and persistence behavior for the whole
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network timeouts, throttling, 5xx responses. Retried per stage policy.
    Transient,
    /// Missing keys, malformed requests. Not retried; surfaced.
    InvalidInput,
    /// Moderation failure or non-card image. Not retried; triggers hard-delete.
    InvalidContent,
    /// Record missing where the pipeline requires it. Not retried.
    NotFound,
    /// LLM output failed schema validation. Not retried; triggers fallback.
    SchemaViolation,
    /// Per-stage or per-execution deadline exceeded. Retryable up to the
    /// stage budget, then fallback or failure.
    DeadlineExceeded,
    /// Cross-tenant access attempt. Never retried.
    PermissionDenied,
}

impl ErrorKind {
    /// Whether the stage retry loop may re-attempt after this error.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::DeadlineExceeded)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transient => "Transient",
            Self::InvalidInput => "InvalidInput",
            Self::InvalidContent => "InvalidContent",
            Self::NotFound => "NotFound",
            Self::SchemaViolation => "SchemaViolation",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::PermissionDenied => "PermissionDenied",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur during pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A call-level timeout elapsed
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// An upstream service shed load
    #[error("Throttled by {resource}")]
    Throttled { resource: String },

    /// Recoverable I/O failure against an external service
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Non-2xx status from an external service
    #[error("{service} returned status {status}")]
    UpstreamStatus { service: String, status: u16 },

    /// Caller supplied an unusable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Image bytes could not be decoded
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Moderation or card-type validation rejected the image
    #[error("Invalid content: {reason}")]
    InvalidContent { reason: String },

    /// A record the pipeline requires does not exist
    #[error("Not found: {entity}")]
    NotFound { entity: String },

    /// Structured output failed schema validation
    #[error("Schema violation: {detail}")]
    SchemaViolation { detail: String },

    /// LLM response contained no parseable JSON payload
    #[error("Malformed LLM output: {0}")]
    LlmMalformed(String),

    /// Cross-tenant read or write attempt
    #[error("Permission denied: {detail}")]
    PermissionDenied { detail: String },

    /// A stage or execution deadline elapsed
    #[error("Deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    /// LLM provider error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Vision backend error
    #[error("Vision service error: {0}")]
    Vision(String),

    /// Store gateway error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a call-level timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a throttling error.
    pub fn throttled(resource: impl Into<String>) -> Self {
        Self::Throttled {
            resource: resource.into(),
        }
    }

    /// Create an upstream-status error.
    pub fn upstream_status(service: impl Into<String>, status: u16) -> Self {
        Self::UpstreamStatus {
            service: service.into(),
            status,
        }
    }

    /// Create an invalid-content error.
    pub fn invalid_content(reason: impl Into<String>) -> Self {
        Self::InvalidContent {
            reason: reason.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    /// Create a schema-violation error.
    pub fn schema_violation(detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            detail: detail.into(),
        }
    }

    /// Create a permission-denied error.
    pub fn permission_denied(detail: impl Into<String>) -> Self {
        Self::PermissionDenied {
            detail: detail.into(),
        }
    }

    /// Create a deadline-exceeded error.
    pub fn deadline_exceeded(deadline_ms: u64) -> Self {
        Self::DeadlineExceeded { deadline_ms }
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Map this error into the pipeline's policy taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } | Self::Throttled { .. } | Self::TransientIo(_) => {
                ErrorKind::Transient
            }
            Self::UpstreamStatus { status, .. } => match status {
                429 => ErrorKind::Transient,
                s if *s >= 500 => ErrorKind::Transient,
                403 => ErrorKind::PermissionDenied,
                404 => ErrorKind::NotFound,
                _ => ErrorKind::InvalidInput,
            },
            Self::InvalidInput(_) | Self::InvalidImage(_) | Self::Config(_) => {
                ErrorKind::InvalidInput
            }
            Self::InvalidContent { .. } => ErrorKind::InvalidContent,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::SchemaViolation { .. } | Self::LlmMalformed(_) | Self::Serialization(_) => {
                ErrorKind::SchemaViolation
            }
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::LlmApi { message, .. } => {
                if is_transient_message(message) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::InvalidInput
                }
            }
            Self::Vision(_) | Self::Storage(_) | Self::Internal(_) => ErrorKind::Transient,
        }
    }

    /// Whether the stage retry loop may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("overloaded")
        || lower.contains("temporarily unavailable")
        || lower.contains("timeout")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_are_retryable() {
        assert!(Error::timeout(500).is_retryable());
        assert!(Error::throttled("llm").is_retryable());
        assert!(Error::TransientIo("reset".into()).is_retryable());
        assert!(Error::upstream_status("market", 503).is_retryable());
        assert!(Error::deadline_exceeded(30_000).is_retryable());
    }

    #[test]
    fn test_terminal_kinds_are_not_retryable() {
        assert!(!Error::invalid_content("moderation").is_retryable());
        assert!(!Error::not_found("card").is_retryable());
        assert!(!Error::schema_violation("missing field").is_retryable());
        assert!(!Error::permission_denied("cross-tenant").is_retryable());
        assert!(!Error::InvalidInput("bad key".into()).is_retryable());
    }

    #[test]
    fn test_upstream_status_mapping() {
        assert_eq!(
            Error::upstream_status("m", 429).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            Error::upstream_status("m", 500).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            Error::upstream_status("m", 403).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(Error::upstream_status("m", 404).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::upstream_status("m", 400).kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_llm_api_message_classification() {
        assert_eq!(
            Error::llm_api("anthropic", "429 too many requests").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            Error::llm_api("anthropic", "invalid api key").kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_malformed_output_is_schema_violation() {
        assert_eq!(
            Error::LlmMalformed("no json".into()).kind(),
            ErrorKind::SchemaViolation
        );
    }
}
