//! Collection lifecycle and ingestion request/response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::chunk::Metadata;

/// Summary of a named collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub name: String,
    /// Number of stored chunks, when the backend reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl CollectionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunk_count: None,
            created_at: None,
            metadata: Metadata::new(),
        }
    }
}

/// Body of `POST /api/collections`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionRequest {
    pub name: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Body of `POST /api/collections/:name/documents`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Caller-supplied document id; generated when absent
    #[serde(default)]
    pub document_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Result of ingesting one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub document_id: String,
    pub success: bool,
    pub chunks_created: usize,
    pub message: String,
}

impl IngestResponse {
    pub fn rejected(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            success: false,
            chunks_created: 0,
            message: message.into(),
        }
    }
}

/// Check a collection name: 3-63 characters of ASCII letters, digits, `_` or `-`,
/// starting and ending with a letter or digit.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidCollectionName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if !(3..=63).contains(&name.len()) {
        return Err(invalid("length must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("only ASCII letters, digits, '_' and '-' are allowed"));
    }
    let edges_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if !edges_ok {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert!(validate_collection_name("academy").is_ok());
        assert!(validate_collection_name("university-scores").is_ok());
        assert!(validate_collection_name("ilo_2024").is_ok());

        assert!(validate_collection_name("ab").is_err());
        assert!(validate_collection_name("has space").is_err());
        assert!(validate_collection_name("-leading").is_err());
        assert!(validate_collection_name("điểm-chuẩn").is_err());
    }

    #[test]
    fn test_ingest_request_camel_case() {
        let req: IngestRequest = serde_json::from_str(
            r#"{"documentId": "doc-1", "content": "Hello", "metadata": {"source": "a.pdf"}}"#,
        )
        .unwrap();
        assert_eq!(req.document_id.as_deref(), Some("doc-1"));
        assert_eq!(req.metadata.len(), 1);

        let resp = IngestResponse::rejected("doc-1", "empty");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["chunksCreated"], 0);
        assert_eq!(json["success"], false);
    }
}
