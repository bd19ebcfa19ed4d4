//! Evidence chunk and typed metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Where an evidence chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Retrieved from an evidence store collection
    KnowledgeBase,
    /// Returned by the web search provider
    WebSearch,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::KnowledgeBase => "knowledge_base",
            SourceTag::WebSearch => "web_search",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata value: string or primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Borrow the string value, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value, rejecting null, arrays and objects
    pub fn from_json(key: &str, value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Ok(MetadataValue::Bool(b)),
            Value::String(s) => Ok(MetadataValue::Text(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(MetadataValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(MetadataValue::Float(f))
                } else {
                    Err(Error::InvalidMetadata {
                        key: key.to_string(),
                        reason: format!("number {} is out of range", n),
                    })
                }
            }
            Value::Null => Err(Error::InvalidMetadata {
                key: key.to_string(),
                reason: "null values are not allowed".to_string(),
            }),
            Value::Array(_) | Value::Object(_) => Err(Error::InvalidMetadata {
                key: key.to_string(),
                reason: "only strings, numbers and booleans are allowed".to_string(),
            }),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Chunk metadata with string keys
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Validate an untyped JSON map into chunk metadata
pub fn metadata_from_json(map: serde_json::Map<String, serde_json::Value>) -> Result<Metadata> {
    map.into_iter()
        .map(|(key, value)| {
            if key.trim().is_empty() {
                return Err(Error::InvalidMetadata {
                    key,
                    reason: "empty key".to_string(),
                });
            }
            let value = MetadataValue::from_json(&key, value)?;
            Ok((key, value))
        })
        .collect()
}

/// A unit of retrievable text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChunk {
    /// Chunk identifier
    pub id: String,
    /// Text content
    pub content: String,
    /// Origin of the chunk
    pub source: SourceTag,
    /// Typed key-value metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Similarity score from retrieval, used only for ordering
    #[serde(default)]
    pub score: f32,
}

impl EvidenceChunk {
    /// Create a knowledge base chunk
    pub fn knowledge(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source: SourceTag::KnowledgeBase,
            metadata: Metadata::new(),
            score,
        }
    }

    /// Create a chunk from a web search hit
    pub fn from_web(index: usize, title: &str, url: &str, snippet: &str, score: f32) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("url".to_string(), url.into());
        metadata.insert("title".to_string(), title.into());

        Self {
            id: format!("web_{}", index),
            content: snippet.to_string(),
            source: SourceTag::WebSearch,
            metadata,
            score,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Source URL for web chunks
    pub fn source_url(&self) -> Option<&str> {
        self.metadata.get("url").and_then(MetadataValue::as_text)
    }

    /// Label used in numbered context blocks
    pub fn label(&self) -> String {
        if let Some(source) = self.metadata.get("source").and_then(MetadataValue::as_text) {
            return source.to_string();
        }
        if let Some(url) = self.source_url() {
            return url.to_string();
        }
        match self.source {
            SourceTag::KnowledgeBase => "knowledge base".to_string(),
            SourceTag::WebSearch => "web search".to_string(),
        }
    }
}

/// A chunk paired with its embedding, ready for upsert
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: EvidenceChunk,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_accepts_primitives() {
        let map = json!({"source": "hust.pdf", "year": 2024, "weight": 0.5, "official": true});
        let metadata = metadata_from_json(map.as_object().cloned().unwrap()).unwrap();

        assert_eq!(metadata["source"], MetadataValue::Text("hust.pdf".to_string()));
        assert_eq!(metadata["year"], MetadataValue::Int(2024));
        assert_eq!(metadata["weight"], MetadataValue::Float(0.5));
        assert_eq!(metadata["official"], MetadataValue::Bool(true));
    }

    #[test]
    fn test_metadata_rejects_nested_values() {
        let map = json!({"tags": ["a", "b"]});
        let err = metadata_from_json(map.as_object().cloned().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata { ref key, .. } if key == "tags"));

        let map = json!({"owner": null});
        assert!(metadata_from_json(map.as_object().cloned().unwrap()).is_err());
    }

    #[test]
    fn test_chunk_labels() {
        let web = EvidenceChunk::from_web(0, "Tuyển sinh", "https://hust.edu.vn", "snippet", 1.0);
        assert_eq!(web.source_url(), Some("https://hust.edu.vn"));
        assert_eq!(web.label(), "https://hust.edu.vn");

        let kb = EvidenceChunk::knowledge("c1", "text", 0.9);
        assert_eq!(kb.label(), "knowledge base");
        assert_eq!(kb.with_metadata("source", "diem-chuan.pdf").label(), "diem-chuan.pdf");
    }

    #[test]
    fn test_source_tag_serialization() {
        assert_eq!(serde_json::to_string(&SourceTag::WebSearch).unwrap(), "\"web_search\"");
        assert_eq!(SourceTag::KnowledgeBase.to_string(), "knowledge_base");
    }
}
