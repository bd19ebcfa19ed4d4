//! Evidence store provider trait for named collections of embedded chunks

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CollectionInfo, EmbeddedChunk, EvidenceChunk, Metadata};

/// Trait for a nearest-neighbor evidence store
///
/// Implementations:
/// - `MemoryStore`: process-local brute-force cosine index
/// - `ChromaStore`: remote Chroma server
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Create a collection; fails with `CollectionExists` if the name is taken
    async fn create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionInfo>;

    /// List all collections
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Delete a collection; returns `false` when it did not exist
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Whether a collection exists
    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self
            .list_collections()
            .await?
            .iter()
            .any(|c| c.name == name))
    }

    /// Insert or replace chunks; fails with `CollectionNotFound` for unknown names
    async fn upsert(&self, collection: &str, chunks: Vec<EmbeddedChunk>) -> Result<usize>;

    /// Return up to `top_k` chunks nearest to `embedding`, best first.
    ///
    /// An unknown collection yields an empty result, not an error.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<EvidenceChunk>>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
