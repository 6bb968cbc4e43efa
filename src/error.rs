//! Error types for collection_query

use thiserror::Error;

/// Unified error type for import, planning and execution
#[derive(Debug, Error)]
pub enum QueryError {
    /// A collection row could not be resolved to a card identity or quantity
    #[error("Import error on line {line}: {field} {reason}")]
    Import {
        line: usize,
        field: &'static str,
        reason: String,
    },
    /// A query parameter is unknown or has the wrong type
    #[error("Invalid query parameter '{parameter}': {reason}")]
    InvalidQuery { parameter: String, reason: String },
    /// A query needs a value the planner refuses to guess
    #[error("Ambiguous query parameter '{parameter}': {reason}")]
    AmbiguousQuery { parameter: String, reason: String },
    /// The enrichment service failed or timed out
    #[error("Enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),
    /// Internal contract violation between planner and engine
    #[error("Execution error: {0}")]
    Execution(String),
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueryError {
    pub(crate) fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidQuery {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn ambiguous(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::AmbiguousQuery {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn import(line: usize, field: &'static str, reason: impl Into<String>) -> Self {
        QueryError::Import {
            line,
            field,
            reason: reason.into(),
        }
    }
}

/// Failure of a single external metadata fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// The service does not know this card
    #[error("Card not found: {0}")]
    NotFound(String),
    /// HTTP request failed (network error, timeout, etc.)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP error status code
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),
    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::NotFound(_) | FetchError::Parse(_) => false,
            FetchError::Network(_) => true,
            FetchError::HttpStatus(status) => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Result alias for collection_query operations
pub type Result<T> = std::result::Result<T, QueryError>;
