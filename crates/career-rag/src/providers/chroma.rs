//! Chroma evidence store over the v1 REST API

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::VectorDbConfig;
use crate::error::{Error, Result};
use crate::types::{
    validate_collection_name, CollectionInfo, EmbeddedChunk, EvidenceChunk, Metadata, SourceTag,
};

use super::vector_store::EvidenceStore;

/// Remote Chroma server; collections use cosine distance
pub struct ChromaStore {
    client: Client,
    base_url: String,
    /// Collection name -> Chroma collection id
    ids: DashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ChromaCollection {
    id: String,
    name: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Serialize)]
struct CreateCollection<'a> {
    name: &'a str,
    metadata: Metadata,
    get_or_create: bool,
}

#[derive(Serialize)]
struct UpsertRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<Metadata>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: Vec<&'a [f32]>,
    n_results: usize,
    include: [&'static str; 3],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

impl ChromaStore {
    pub fn new(config: &VectorDbConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            ids: DashMap::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::evidence_store(format!("{} failed: HTTP {} - {}", what, status, body)))
    }

    /// Like [`Self::check`], but a missing collection also evicts its cached id
    /// and comes back as `Ok(None)`
    async fn check_live(
        &self,
        collection: &str,
        response: reqwest::Response,
        what: &str,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            return Ok(Some(response));
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if is_missing_collection(status, &body) {
            tracing::warn!("Collection '{}' vanished from Chroma, dropping cached id", collection);
            self.ids.remove(collection);
            return Ok(None);
        }
        Err(Error::evidence_store(format!("{} failed: HTTP {} - {}", what, status, body)))
    }

    /// Resolve a collection name to its Chroma id, `None` if it does not exist
    async fn collection_id(&self, name: &str) -> Result<Option<String>> {
        if let Some(id) = self.ids.get(name) {
            return Ok(Some(id.value().clone()));
        }

        let response = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(|e| Error::evidence_store(format!("Chroma request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let collection: ChromaCollection = response.json().await?;
            self.ids.insert(name.to_string(), collection.id.clone());
            return Ok(Some(collection.id));
        }

        let body = response.text().await.unwrap_or_default();
        if is_missing_collection(status, &body) {
            Ok(None)
        } else {
            Err(Error::evidence_store(format!(
                "Collection lookup failed: HTTP {} - {}",
                status, body
            )))
        }
    }

    async fn count(&self, id: &str) -> Option<usize> {
        let response = self
            .client
            .get(self.url(&format!("/collections/{}/count", id)))
            .send()
            .await
            .ok()?;
        response.json::<usize>().await.ok()
    }
}

#[async_trait]
impl EvidenceStore for ChromaStore {
    async fn create_collection(&self, name: &str, mut metadata: Metadata) -> Result<CollectionInfo> {
        validate_collection_name(name)?;
        if self.collection_id(name).await?.is_some() {
            return Err(Error::CollectionExists(name.to_string()));
        }

        metadata.insert("hnsw:space".to_string(), "cosine".into());
        let request = CreateCollection {
            name,
            metadata,
            get_or_create: false,
        };

        let response = self
            .client
            .post(self.url("/collections"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::evidence_store(format!("Chroma request failed: {}", e)))?;
        let collection: ChromaCollection = Self::check(response, "Create collection")
            .await?
            .json()
            .await?;

        tracing::info!("Created collection '{}' ({})", collection.name, collection.id);
        self.ids.insert(collection.name.clone(), collection.id.clone());

        Ok(CollectionInfo {
            name: collection.name,
            chunk_count: Some(0),
            created_at: Some(chrono::Utc::now()),
            metadata: collection.metadata.unwrap_or_default(),
        })
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let response = self
            .client
            .get(self.url("/collections"))
            .send()
            .await
            .map_err(|e| Error::evidence_store(format!("Chroma request failed: {}", e)))?;
        let collections: Vec<ChromaCollection> = Self::check(response, "List collections")
            .await?
            .json()
            .await?;

        let mut infos = Vec::with_capacity(collections.len());
        for collection in collections {
            self.ids.insert(collection.name.clone(), collection.id.clone());
            infos.push(CollectionInfo {
                chunk_count: self.count(&collection.id).await,
                created_at: None,
                metadata: collection.metadata.unwrap_or_default(),
                name: collection.name,
            });
        }
        Ok(infos)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        if self.collection_id(name).await?.is_none() {
            return Ok(false);
        }

        let response = self
            .client
            .delete(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(|e| Error::evidence_store(format!("Chroma request failed: {}", e)))?;
        Self::check(response, "Delete collection").await?;

        self.ids.remove(name);
        tracing::info!("Deleted collection '{}'", name);
        Ok(true)
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collection_id(name).await?.is_some())
    }

    async fn upsert(&self, collection: &str, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        let id = self
            .collection_id(collection)
            .await?
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let count = chunks.len();
        let mut request = UpsertRequest {
            ids: Vec::with_capacity(count),
            embeddings: Vec::with_capacity(count),
            documents: Vec::with_capacity(count),
            metadatas: Vec::with_capacity(count),
        };
        for EmbeddedChunk { chunk, embedding } in chunks {
            request.ids.push(chunk.id);
            request.embeddings.push(embedding);
            request.documents.push(chunk.content);
            request.metadatas.push(chunk.metadata);
        }

        let response = self
            .client
            .post(self.url(&format!("/collections/{}/upsert", id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::evidence_store(format!("Chroma request failed: {}", e)))?;
        if self.check_live(collection, response, "Upsert").await?.is_none() {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }

        Ok(count)
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<EvidenceChunk>> {
        let Some(id) = self.collection_id(collection).await? else {
            tracing::debug!("Query against unknown collection '{}'", collection);
            return Ok(Vec::new());
        };

        let request = QueryRequest {
            query_embeddings: vec![embedding],
            n_results: top_k,
            include: ["documents", "metadatas", "distances"],
        };

        let response = self
            .client
            .post(self.url(&format!("/collections/{}/query", id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::evidence_store(format!("Chroma request failed: {}", e)))?;
        let Some(response) = self.check_live(collection, response, "Query").await? else {
            return Ok(Vec::new());
        };
        let result: QueryResponse = response.json().await?;

        Ok(into_chunks(result))
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.url("/heartbeat")).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "chroma"
    }
}

// Older Chroma releases answer a missing collection with a 500 ValueError
fn is_missing_collection(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || body.contains("does not exist")
}

/// Flatten the first (only) query row; score = 1 - cosine distance
fn into_chunks(result: QueryResponse) -> Vec<EvidenceChunk> {
    let ids = result.ids.into_iter().next().unwrap_or_default();
    let documents = result
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let metadatas = result
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default();
    let distances = result
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| EvidenceChunk {
            id,
            content: documents.get(i).cloned().flatten().unwrap_or_default(),
            source: SourceTag::KnowledgeBase,
            metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
            score: distances.get(i).map_or(0.0, |d| 1.0 - d),
        })
        .collect()
}
