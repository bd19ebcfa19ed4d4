//! Document ingestion: chunk, embed and upsert into a named collection

mod chunker;

pub use chunker::{TextChunker, TextPiece};

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, EvidenceStore};
use crate::types::{
    metadata_from_json, EmbeddedChunk, EvidenceChunk, IngestRequest, IngestResponse, MetadataValue,
};

/// Ingests documents into existing collections
pub struct Ingestor {
    store: Arc<dyn EvidenceStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: TextChunker,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(
        config: &RagConfig,
        store: Arc<dyn EvidenceStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(
            store,
            embedder,
            TextChunker::from_config(&config.chunking),
            config.embeddings.batch_size,
        )
    }

    /// Chunk, embed and store one document.
    ///
    /// Blank content is answered with an unsuccessful response rather than an
    /// error. The collection must already exist.
    pub async fn ingest(&self, collection: &str, request: IngestRequest) -> Result<IngestResponse> {
        let document_id = request
            .document_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("doc_{}", Uuid::new_v4()));

        if request.content.trim().is_empty() {
            return Ok(IngestResponse::rejected(document_id, "Document content is empty"));
        }

        let base_metadata = metadata_from_json(request.metadata)?;

        if !self.store.has_collection(collection).await? {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }

        let mut pieces = self.chunker.chunk(&request.content);
        if pieces.is_empty() {
            // Shorter than the minimum chunk size; keep it whole
            let content = request.content.trim().to_string();
            pieces.push(TextPiece {
                index: 0,
                start: 0,
                end: request.content.len(),
                content,
            });
        }

        let indexed_at = Utc::now().to_rfc3339();
        let chunks: Vec<EvidenceChunk> = pieces
            .into_iter()
            .map(|piece| {
                let mut chunk = EvidenceChunk::knowledge(
                    format!("{}_chunk_{}", document_id, piece.index),
                    piece.content,
                    0.0,
                );
                chunk.metadata = base_metadata.clone();
                chunk
                    .with_metadata("document_id", document_id.as_str())
                    .with_metadata("chunk_index", MetadataValue::Int(piece.index as i64))
                    .with_metadata("indexed_at", indexed_at.as_str())
            })
            .collect();

        tracing::info!(
            "Ingesting document {} into '{}' as {} chunks",
            document_id,
            collection,
            chunks.len()
        );

        let mut stored = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(Error::embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            let width = self.embedder.dimensions();
            if let Some(bad) = embeddings.iter().find(|e| e.len() != width) {
                return Err(Error::embedding(format!(
                    "{} returned a {}-dimensional embedding, expected {}",
                    self.embedder.name(),
                    bad.len(),
                    width
                )));
            }

            let embedded = batch
                .iter()
                .cloned()
                .zip(embeddings)
                .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
                .collect();
            stored += self.store.upsert(collection, embedded).await?;
        }

        Ok(IngestResponse {
            document_id,
            success: true,
            chunks_created: stored,
            message: format!("Ingested {} chunks into '{}'", stored, collection),
        })
    }
}
