//! Error types for the retrieval pipeline and its HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Evidence store (vector index) error
    #[error("Evidence store error: {0}")]
    EvidenceStore(String),

    /// Collection lookup failed
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection already present
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    /// Collection name rejected
    #[error("Invalid collection name '{name}': {reason}")]
    InvalidCollectionName { name: String, reason: String },

    /// Metadata value that is not a string, number or boolean
    #[error("Invalid metadata for key '{key}': {reason}")]
    InvalidMetadata { key: String, reason: String },

    /// Text generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// The generation stream could not be opened
    #[error("Failed to start generation stream: {0}")]
    GenerationStart(String),

    /// Web search error
    #[error("Web search error: {0}")]
    WebSearch(String),

    /// Authentication failure
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller or session cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create an evidence store error
    pub fn evidence_store(message: impl Into<String>) -> Self {
        Self::EvidenceStore(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a web search error
    pub fn web_search(message: impl Into<String>) -> Self {
        Self::WebSearch(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error came from cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_error"),
            Error::EvidenceStore(_) => (StatusCode::BAD_GATEWAY, "evidence_store_error"),
            Error::CollectionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::CollectionExists(_) => (StatusCode::CONFLICT, "conflict"),
            Error::InvalidCollectionName { .. } => (StatusCode::BAD_REQUEST, "invalid_collection"),
            Error::InvalidMetadata { .. } => (StatusCode::BAD_REQUEST, "invalid_metadata"),
            Error::Llm(_) | Error::GenerationStart(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "llm_error")
            }
            Error::WebSearch(_) => (StatusCode::BAD_GATEWAY, "web_search_error"),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Error::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            Error::Toml(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
