//! Application state for the chat server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bridge::StreamBridge;
use crate::config::{LlmBackend, RagConfig, StoreBackend};
use crate::error::{Error, Result};
use crate::ingestion::Ingestor;
use crate::pipeline::{
    GenerationSettings, Grader, Orchestrator, PromptBuilder, QueryRouter, RetrievalEngine,
};
use crate::providers::{
    chroma::ChromaStore,
    memory::MemoryStore,
    ollama::ollama_providers,
    openai::openai_providers,
    tavily::TavilyClient,
    AnonymousAuthenticator, Authenticator, CachedAuthenticator, EmbeddingProvider, EvidenceStore,
    HttpAuthenticator, IloProfileClient, ProfileContextProvider, TextGenerator, TokenCache,
    WebSearchProvider,
};
use crate::types::Metadata;

/// Collaborators the server is assembled from
pub struct Components {
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn EvidenceStore>,
    pub web: Option<Arc<dyn WebSearchProvider>>,
    pub authenticator: Arc<dyn Authenticator>,
    pub profiles: Option<Arc<dyn ProfileContextProvider>>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: RagConfig,
    /// Text generation backend
    generator: Arc<dyn TextGenerator>,
    /// Evidence store (memory or Chroma)
    store: Arc<dyn EvidenceStore>,
    /// Per-turn state machine, shared by every session
    orchestrator: Arc<Orchestrator>,
    /// Session relay for WebSocket chat
    bridge: StreamBridge,
    /// Document ingestion into collections
    ingestor: Ingestor,
    /// Session authentication
    authenticator: Arc<dyn Authenticator>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create application state from configuration
    pub async fn new(config: RagConfig) -> Result<Self> {
        tracing::info!("Initializing chat server state (llm: {:?}, store: {:?})...", config.llm.backend, config.vector_db.backend);

        let (generator, embedder): (Arc<dyn TextGenerator>, Arc<dyn EmbeddingProvider>) =
            match config.llm.backend {
                LlmBackend::Ollama => {
                    let (generator, embedder) =
                        ollama_providers(&config.llm, config.embeddings.dimensions)?;
                    (Arc::new(generator), Arc::new(embedder))
                }
                LlmBackend::OpenAi => {
                    let (generator, embedder) =
                        openai_providers(&config.llm, config.embeddings.dimensions)?;
                    (Arc::new(generator), Arc::new(embedder))
                }
            };
        tracing::info!(
            "Text generation via {} ({}), embeddings via {}",
            generator.name(),
            generator.model(),
            embedder.name()
        );

        let store: Arc<dyn EvidenceStore> = match config.vector_db.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Chroma => Arc::new(ChromaStore::new(&config.vector_db)?),
        };
        tracing::info!("Evidence store initialized ({})", store.name());

        let web: Option<Arc<dyn WebSearchProvider>> = if config.web_search.is_active() {
            tracing::info!("Web search enabled (max {} results)", config.web_search.max_results);
            Some(Arc::new(TavilyClient::new(&config.web_search)?))
        } else {
            tracing::info!("Web search disabled");
            None
        };

        let authenticator: Arc<dyn Authenticator> = if config.auth.enabled {
            let cache = Arc::new(TokenCache::new(std::time::Duration::from_secs(
                config.auth.token_ttl_secs,
            )));
            Arc::new(CachedAuthenticator::new(
                Arc::new(HttpAuthenticator::new(&config.auth)?),
                cache,
            ))
        } else {
            tracing::warn!("Authentication disabled, chat sessions are anonymous");
            Arc::new(AnonymousAuthenticator)
        };

        let profiles: Option<Arc<dyn ProfileContextProvider>> = match &config.profile.base_url {
            Some(url) => Some(Arc::new(IloProfileClient::new(url)?)),
            None => None,
        };

        let state = Self::from_parts(
            config,
            Components {
                generator,
                embedder,
                store,
                web,
                authenticator,
                profiles,
            },
        )?;
        state.ensure_default_collection().await;
        Ok(state)
    }

    /// Assemble state from already-built collaborators
    pub fn from_parts(config: RagConfig, parts: Components) -> Result<Self> {
        let pipeline = &config.pipeline;
        let grader = Grader::new(Arc::clone(&parts.generator), pipeline.grader_max_tokens);
        let retrieval = RetrievalEngine::new(
            Arc::clone(&parts.store),
            Arc::clone(&parts.embedder),
            parts.web,
            grader.clone(),
            pipeline.top_k,
            config.web_search.max_results,
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&parts.generator),
            QueryRouter::new(Arc::clone(&parts.generator), pipeline.classifier_max_tokens),
            retrieval,
            grader,
            PromptBuilder::new()?,
            GenerationSettings::from_config(pipeline, &config.vector_db.default_collection),
        ));

        let mut bridge = StreamBridge::new(Arc::clone(&orchestrator), &config.session)
            .with_adaptive(pipeline.adaptive);
        if let Some(profiles) = parts.profiles {
            bridge = bridge.with_profiles(profiles);
        }

        let ingestor = Ingestor::from_config(&config, Arc::clone(&parts.store), parts.embedder);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                generator: parts.generator,
                store: parts.store,
                orchestrator,
                bridge,
                ingestor,
                authenticator: parts.authenticator,
                ready: RwLock::new(true),
            }),
        })
    }

    /// Create the default collection if the store does not have it yet
    async fn ensure_default_collection(&self) {
        let name = &self.inner.config.vector_db.default_collection;
        match self.inner.store.create_collection(name, Metadata::new()).await {
            Ok(_) => tracing::info!("Created default collection '{}'", name),
            Err(Error::CollectionExists(_)) => {}
            Err(e) => tracing::warn!("Could not ensure default collection '{}': {}", name, e),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn generator(&self) -> &Arc<dyn TextGenerator> {
        &self.inner.generator
    }

    pub fn store(&self) -> &Arc<dyn EvidenceStore> {
        &self.inner.store
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.inner.orchestrator
    }

    pub fn bridge(&self) -> &StreamBridge {
        &self.inner.bridge
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.inner.ingestor
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.inner.authenticator
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::testing::{HashEmbedder, ScriptedGenerator};

    /// State over in-memory collaborators with auth disabled
    pub fn test_state(config: RagConfig, generator: Arc<ScriptedGenerator>) -> (AppState, Arc<MemoryStore>) {
        test_state_with_auth(config, generator, Arc::new(AnonymousAuthenticator))
    }

    pub fn test_state_with_auth(
        config: RagConfig,
        generator: Arc<ScriptedGenerator>,
        authenticator: Arc<dyn Authenticator>,
    ) -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::from_parts(
            config,
            Components {
                generator,
                embedder: Arc::new(HashEmbedder::new(8)),
                store: store.clone(),
                web: None,
                authenticator,
                profiles: None,
            },
        )
        .expect("state builds");
        (state, store)
    }
}
