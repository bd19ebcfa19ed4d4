//! Text embedding for documents and questions

use async_trait::async_trait;

use crate::error::Result;

/// Turns text into vectors in one fixed-width space.
///
/// Ingestion and retrieval must share a provider: evidence stored with one
/// model cannot be searched with another.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, one request each unless the backend batches
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Width of every vector this provider returns
    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;
}
