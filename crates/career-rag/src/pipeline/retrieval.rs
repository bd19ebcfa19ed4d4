//! Retrieval and grading engine
//!
//! Produces the evidence set for a turn from the evidence store and web
//! search. Transport failures never escape: a failed source contributes no
//! chunks and the turn proceeds without that signal.

use futures::future::join_all;
use std::sync::Arc;

use crate::providers::{EmbeddingProvider, EvidenceStore, WebSearchProvider};
use crate::types::EvidenceChunk;

use super::grader::Grader;
use super::prompt::Verdict;
use super::state::Route;

/// Evidence gathered for a turn
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub chunks: Vec<EvidenceChunk>,
    /// Effective route actually used
    pub route: Route,
    /// Chunks returned before grading
    pub retrieved: usize,
    /// The vectorstore -> web search fallback has fired
    pub fallback_fired: bool,
    /// Web search was called during this turn
    pub web_attempted: bool,
}

impl Retrieval {
    fn empty(route: Route) -> Self {
        Self {
            chunks: Vec::new(),
            route,
            retrieved: 0,
            fallback_fired: false,
            web_attempted: false,
        }
    }
}

pub struct RetrievalEngine {
    store: Arc<dyn EvidenceStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    /// `None` disables web search, both as a route and as a fallback
    web: Option<Arc<dyn WebSearchProvider>>,
    grader: Grader,
    top_k: usize,
    web_max_results: usize,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        web: Option<Arc<dyn WebSearchProvider>>,
        grader: Grader,
        top_k: usize,
        web_max_results: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            web,
            grader,
            top_k,
            web_max_results,
        }
    }

    pub fn web_enabled(&self) -> bool {
        self.web.is_some()
    }

    /// Fetch candidate chunks for the route, applying the web search fallback
    pub async fn retrieve(&self, question: &str, collection: &str, route: Route) -> Retrieval {
        let mut result = Retrieval::empty(route);

        match route {
            Route::DirectAnswer => return result,
            Route::WebSearch => {
                result.web_attempted = true;
                match self.web_search(question).await {
                    Some(chunks) if !chunks.is_empty() => {
                        result.retrieved = chunks.len();
                        result.chunks = chunks;
                        return result;
                    }
                    _ => {
                        tracing::info!("Web search produced nothing, falling back to vectorstore");
                        result.route = Route::VectorStore;
                    }
                }
            }
            Route::VectorStore => {}
        }

        result.chunks = self.vector_search(question, collection).await;
        result.retrieved = result.chunks.len();

        if result.chunks.is_empty() {
            self.fallback(question, &mut result).await;
        }
        result
    }

    /// Drop chunks a successful grading call judged irrelevant.
    ///
    /// Grading errors and unclear replies keep the chunk. If nothing survives,
    /// the web search fallback gets its one chance.
    pub async fn grade(&self, question: &str, mut retrieval: Retrieval) -> Retrieval {
        if retrieval.chunks.is_empty() {
            return retrieval;
        }

        let verdicts = join_all(
            retrieval
                .chunks
                .iter()
                .map(|chunk| self.grader.relevance(question, chunk)),
        )
        .await;

        let total = retrieval.chunks.len();
        let chunks = std::mem::take(&mut retrieval.chunks);
        retrieval.chunks = chunks
            .into_iter()
            .zip(verdicts)
            .filter_map(|(chunk, verdict)| match verdict {
                Ok(Verdict::No) => {
                    tracing::debug!("Dropping irrelevant chunk {}", chunk.id);
                    None
                }
                Ok(_) => Some(chunk),
                Err(e) => {
                    tracing::warn!("Failed to grade chunk {}, keeping it: {}", chunk.id, e);
                    Some(chunk)
                }
            })
            .collect();

        tracing::info!(
            "Filtered {} relevant chunks from {} retrieved",
            retrieval.chunks.len(),
            total
        );

        if retrieval.chunks.is_empty() {
            self.fallback(question, &mut retrieval).await;
        }
        retrieval
    }

    /// One-shot vectorstore -> web search fallback
    async fn fallback(&self, question: &str, retrieval: &mut Retrieval) {
        if retrieval.route != Route::VectorStore
            || retrieval.fallback_fired
            || retrieval.web_attempted
            || !self.web_enabled()
        {
            return;
        }

        tracing::info!("No usable evidence in vectorstore, trying web search fallback");
        retrieval.fallback_fired = true;
        retrieval.web_attempted = true;

        if let Some(chunks) = self.web_search(question).await {
            if !chunks.is_empty() {
                retrieval.chunks = chunks;
                retrieval.route = Route::WebSearch;
            }
        }
    }

    async fn vector_search(&self, question: &str, collection: &str) -> Vec<EvidenceChunk> {
        let embedding = match self.embedder.embed(question).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Failed to embed question, continuing without evidence: {}", e);
                return Vec::new();
            }
        };

        match self.store.query(collection, &embedding, self.top_k).await {
            Ok(chunks) => {
                tracing::info!(
                    "Retrieved {} chunks from collection '{}'",
                    chunks.len(),
                    collection
                );
                chunks
            }
            Err(e) => {
                tracing::warn!("Evidence store query failed, continuing without evidence: {}", e);
                Vec::new()
            }
        }
    }

    /// `None` when web search is disabled or the call failed
    async fn web_search(&self, question: &str) -> Option<Vec<EvidenceChunk>> {
        let web = self.web.as_ref()?;

        match web.search(question, self.web_max_results).await {
            Ok(results) => {
                tracing::info!("Web search returned {} results", results.len());
                Some(
                    results
                        .iter()
                        .enumerate()
                        .map(|(i, r)| {
                            EvidenceChunk::from_web(i, &r.title, &r.url, &r.snippet, 1.0 / (i + 1) as f32)
                        })
                        .collect(),
                )
            }
            Err(e) => {
                tracing::warn!("Web search via {} failed: {}", web.name(), e);
                None
            }
        }
    }
}
