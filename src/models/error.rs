//! Error types for verisynth.
//!
//! Two layers:
//! - `VerisynthError`: stage-level failures (config, I/O, completion service).
//!   These abort the current stage.
//! - `RecordError`: per-record failures. These never leave a stage; they are
//!   tallied in [`StageStats`](super::StageStats) and the record is excluded.

use thiserror::Error;

/// Top-level error type for verisynth.
#[derive(Debug, Error)]
pub enum VerisynthError {
    // ═══════════════════════════════════════════════════════════════════
    // Input and configuration
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Completion service
    // ═══════════════════════════════════════════════════════════════════
    #[error("Completion service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    // ═══════════════════════════════════════════════════════════════════
    // Invariant violations
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by an OpenAI-compatible completion endpoint.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("Every request in the batch failed ({0} requests)")]
    BatchFailed(usize),
}

impl VerisynthError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_)
        )
    }
}

/// Per-record failure taxonomy.
///
/// A record hitting any of these is excluded from the stage output and
/// counted; the batch carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Structured output unrecoverable after every parser fallback.
    #[error("unparseable structured output")]
    ParseFailure,

    /// A manifest id has no matching result in the result set.
    #[error("no result for correlation id {custom_id}")]
    MissingCorrelation { custom_id: String },

    /// Parsed object lacks an expected key or has the wrong shape.
    #[error("schema violation: {detail}")]
    SchemaViolation { detail: String },

    /// Conversation history of odd length.
    #[error("malformed history: {len} turns")]
    MalformedHistory { len: usize },
}

impl RecordError {
    pub fn schema(detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            detail: detail.into(),
        }
    }

    /// Malformed history is a skip, everything else is an error.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::MalformedHistory { .. })
    }
}

/// Result type alias for verisynth.
pub type Result<T> = std::result::Result<T, VerisynthError>;
