//! Scripted collaborators for unit tests

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::pipeline::prompt::{GROUNDED_MARKER, RELEVANCE_MARKER, ROUTE_MARKER};
use crate::pipeline::{GenerationSettings, Grader, Orchestrator, PromptBuilder, QueryRouter, RetrievalEngine};
use crate::providers::{
    EmbeddingProvider, EvidenceStore, SamplingParams, TextGenerator, TokenStream,
    WebSearchProvider, WebSearchResult,
};
use crate::types::{CollectionInfo, EmbeddedChunk, EvidenceChunk, Metadata};

/// What a generation call was for, recognized from the prompt's closing line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Route,
    Relevance,
    Grounded,
    Answer,
}

impl CallKind {
    fn of(prompt: &str) -> Self {
        if prompt.ends_with(ROUTE_MARKER) {
            CallKind::Route
        } else if prompt.ends_with(RELEVANCE_MARKER) {
            CallKind::Relevance
        } else if prompt.ends_with(GROUNDED_MARKER) {
            CallKind::Grounded
        } else {
            CallKind::Answer
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub prompt: String,
    pub params: SamplingParams,
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
}

#[derive(Debug, Clone)]
enum Answer {
    Tokens(Vec<String>),
    FailStart,
    ThenError(Vec<String>),
    Hang(Vec<String>),
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

struct DropSignal(Arc<Notify>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Text generator answering each prompt kind from a script and recording every call
pub struct ScriptedGenerator {
    route: Reply,
    relevance_default: Reply,
    relevance_by_content: Vec<(String, Reply)>,
    grounded: Mutex<VecDeque<Reply>>,
    grounded_default: Reply,
    answers: Mutex<VecDeque<Answer>>,
    answer_default: Answer,
    calls: Mutex<Vec<Call>>,
    dropped: Arc<Notify>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            route: Reply::Text("vectorstore".to_string()),
            relevance_default: Reply::Text("yes".to_string()),
            relevance_by_content: Vec::new(),
            grounded: Mutex::new(VecDeque::new()),
            grounded_default: Reply::Text("yes".to_string()),
            answers: Mutex::new(VecDeque::new()),
            answer_default: Answer::Tokens(owned(&["A", "B", "C"])),
            calls: Mutex::new(Vec::new()),
            dropped: Arc::new(Notify::new()),
        }
    }

    pub fn route_reply(mut self, reply: &str) -> Self {
        self.route = Reply::Text(reply.to_string());
        self
    }

    pub fn fail_routing(mut self) -> Self {
        self.route = Reply::Fail;
        self
    }

    pub fn relevance_reply(mut self, reply: &str) -> Self {
        self.relevance_default = Reply::Text(reply.to_string());
        self
    }

    /// Reply for relevance prompts whose document contains `needle`
    pub fn relevance_for(mut self, needle: &str, reply: &str) -> Self {
        self.relevance_by_content
            .push((needle.to_string(), Reply::Text(reply.to_string())));
        self
    }

    pub fn fail_relevance_for(mut self, needle: &str) -> Self {
        self.relevance_by_content.push((needle.to_string(), Reply::Fail));
        self
    }

    /// Groundedness replies consumed in order, then the default
    pub fn grounded_replies(mut self, replies: &[&str]) -> Self {
        self.grounded
            .get_mut()
            .extend(replies.iter().map(|r| Reply::Text(r.to_string())));
        self
    }

    pub fn grounded_default(mut self, reply: &str) -> Self {
        self.grounded_default = Reply::Text(reply.to_string());
        self
    }

    pub fn fail_grounded(mut self) -> Self {
        self.grounded_default = Reply::Fail;
        self
    }

    /// Queue one answer stream
    pub fn answer(mut self, tokens: &[&str]) -> Self {
        self.answers.get_mut().push_back(Answer::Tokens(owned(tokens)));
        self
    }

    pub fn answer_default(mut self, tokens: &[&str]) -> Self {
        self.answer_default = Answer::Tokens(owned(tokens));
        self
    }

    /// Queue an answer whose stream fails to start
    pub fn fail_answer_start(mut self) -> Self {
        self.answers.get_mut().push_back(Answer::FailStart);
        self
    }

    /// Queue an answer that breaks off with a transport error
    pub fn answer_then_error(mut self, tokens: &[&str]) -> Self {
        self.answers.get_mut().push_back(Answer::ThenError(owned(tokens)));
        self
    }

    /// Queue an answer that never finishes after its tokens
    pub fn hanging_answer(mut self, tokens: &[&str]) -> Self {
        self.answers.get_mut().push_back(Answer::Hang(owned(tokens)));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind == kind).count()
    }

    pub fn prompts(&self, kind: CallKind) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.prompt.clone())
            .collect()
    }

    /// Resolves once a hanging answer stream has been dropped
    pub async fn stream_dropped(&self) {
        self.dropped.notified().await
    }

    fn reply_stream(reply: Reply) -> Result<TokenStream> {
        match reply {
            Reply::Text(text) => Ok(futures::stream::iter(vec![Ok(text)]).boxed()),
            Reply::Fail => Err(Error::llm("scripted failure")),
        }
    }

    fn answer_stream(&self, answer: Answer) -> Result<TokenStream> {
        match answer {
            Answer::Tokens(tokens) => Ok(futures::stream::iter(tokens.into_iter().map(Ok)).boxed()),
            Answer::FailStart => Err(Error::GenerationStart("connection refused".to_string())),
            Answer::ThenError(tokens) => Ok(futures::stream::iter(tokens.into_iter().map(Ok))
                .chain(futures::stream::once(async {
                    Err(Error::llm("connection reset"))
                }))
                .boxed()),
            Answer::Hang(tokens) => {
                let guard = DropSignal(self.dropped.clone());
                Ok(futures::stream::iter(tokens.into_iter().map(Ok))
                    .chain(futures::stream::pending())
                    .map(move |item| {
                        let _guard = &guard;
                        item
                    })
                    .boxed())
            }
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn stream(&self, prompt: &str, params: &SamplingParams) -> Result<TokenStream> {
        let kind = CallKind::of(prompt);
        self.calls.lock().push(Call {
            kind,
            prompt: prompt.to_string(),
            params: *params,
        });

        match kind {
            CallKind::Route => Self::reply_stream(self.route.clone()),
            CallKind::Relevance => {
                let reply = self
                    .relevance_by_content
                    .iter()
                    .find(|(needle, _)| prompt.contains(needle.as_str()))
                    .map(|(_, reply)| reply.clone())
                    .unwrap_or_else(|| self.relevance_default.clone());
                Self::reply_stream(reply)
            }
            CallKind::Grounded => {
                let reply = self
                    .grounded
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| self.grounded_default.clone());
                Self::reply_stream(reply)
            }
            CallKind::Answer => {
                let answer = self
                    .answers
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| self.answer_default.clone());
                self.answer_stream(answer)
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}

/// Evidence store returning fixed chunks per collection
pub struct FixedStore {
    collections: Mutex<HashMap<String, Vec<EvidenceChunk>>>,
    fail: bool,
}

impl FixedStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_collection(mut self, name: &str, chunks: Vec<EvidenceChunk>) -> Self {
        self.collections.get_mut().insert(name.to_string(), chunks);
        self
    }
}

#[async_trait]
impl EvidenceStore for FixedStore {
    async fn create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionInfo> {
        let mut collections = self.collections.lock();
        if collections.contains_key(name) {
            return Err(Error::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), Vec::new());
        Ok(CollectionInfo {
            metadata,
            ..CollectionInfo::new(name)
        })
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut names: Vec<CollectionInfo> = self
            .collections
            .lock()
            .iter()
            .map(|(name, chunks)| CollectionInfo {
                chunk_count: Some(chunks.len()),
                ..CollectionInfo::new(name.clone())
            })
            .collect();
        names.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.lock().remove(name).is_some())
    }

    async fn upsert(&self, collection: &str, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        let mut collections = self.collections.lock();
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        let count = chunks.len();
        stored.extend(chunks.into_iter().map(|c| c.chunk));
        Ok(count)
    }

    async fn query(
        &self,
        collection: &str,
        _embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<EvidenceChunk>> {
        if self.fail {
            return Err(Error::evidence_store("connection refused"));
        }
        Ok(self
            .collections
            .lock()
            .get(collection)
            .map(|chunks| chunks.iter().take(top_k).cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Web search returning `n` synthetic results and counting calls
pub struct CountingSearch {
    results: usize,
    fail: bool,
    calls: AtomicUsize,
}

impl CountingSearch {
    pub fn with_results(results: usize) -> Self {
        Self {
            results,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_results(0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearchProvider for CountingSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<WebSearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::web_search("quota exceeded"));
        }
        Ok((0..self.results.min(max_results))
            .map(|i| WebSearchResult {
                title: format!("Result {}", i),
                url: format!("https://example.vn/{}", i),
                snippet: format!("Snippet {}", i),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Deterministic bag-of-bytes embedder
pub struct HashEmbedder {
    dimensions: usize,
    fail: bool,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail: false,
        }
    }

    pub fn failing(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(Error::embedding("model not loaded"));
        }
        let mut vector = vec![0.0; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            vector[(byte as usize + i) % self.dimensions] += 1.0;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Orchestrator over scripted collaborators with default pipeline settings
pub fn pipeline(
    generator: Arc<ScriptedGenerator>,
    store: FixedStore,
    web: Option<Arc<CountingSearch>>,
) -> Orchestrator {
    let config = PipelineConfig::default();
    let grader = Grader::new(generator.clone(), config.grader_max_tokens);

    Orchestrator::new(
        generator.clone(),
        QueryRouter::new(generator, config.classifier_max_tokens),
        RetrievalEngine::new(
            Arc::new(store),
            Arc::new(HashEmbedder::new(8)),
            web.map(|w| w as Arc<dyn WebSearchProvider>),
            grader.clone(),
            config.top_k,
            3,
        ),
        grader,
        PromptBuilder::new().expect("language pattern compiles"),
        GenerationSettings::from_config(&config, "academy"),
    )
}
