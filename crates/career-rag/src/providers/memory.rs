//! In-process evidence store using brute-force cosine similarity

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{validate_collection_name, CollectionInfo, EmbeddedChunk, EvidenceChunk, Metadata};

use super::vector_store::EvidenceStore;

struct MemoryCollection {
    info: CollectionInfo,
    chunks: HashMap<String, EmbeddedChunk>,
}

/// Evidence store that keeps every collection in memory
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, MemoryCollection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity; zero for mismatched or zero-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl EvidenceStore for MemoryStore {
    async fn create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionInfo> {
        validate_collection_name(name)?;

        match self.collections.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::CollectionExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let info = CollectionInfo {
                    name: name.to_string(),
                    chunk_count: Some(0),
                    created_at: Some(Utc::now()),
                    metadata,
                };
                slot.insert(MemoryCollection {
                    info: info.clone(),
                    chunks: HashMap::new(),
                });
                Ok(info)
            }
        }
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut infos: Vec<CollectionInfo> = self
            .collections
            .iter()
            .map(|entry| CollectionInfo {
                chunk_count: Some(entry.chunks.len()),
                ..entry.info.clone()
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.remove(name).is_some())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.contains_key(name))
    }

    async fn upsert(&self, collection: &str, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        let count = chunks.len();
        for chunk in chunks {
            entry.chunks.insert(chunk.chunk.id.clone(), chunk);
        }
        Ok(count)
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<EvidenceChunk>> {
        let Some(entry) = self.collections.get(collection) else {
            tracing::debug!("Query against unknown collection '{}'", collection);
            return Ok(Vec::new());
        };

        let mut scored: Vec<EvidenceChunk> = entry
            .chunks
            .values()
            .map(|stored| {
                let mut chunk = stored.chunk.clone();
                chunk.score = cosine_similarity(embedding, &stored.embedding);
                chunk
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
