//! Provider abstractions for generation, embeddings, evidence storage, web
//! search and session identity
//!
//! Traits here are the seams the pipeline is written against; concrete
//! backends (Ollama, OpenAI, Chroma, Tavily) are selected from config.

pub mod auth;
pub mod chroma;
pub mod embedding;
pub mod llm;
pub mod memory;
pub mod ollama;
pub mod openai;
pub mod profile;
pub mod stream;
pub mod tavily;
pub mod vector_store;
pub mod web_search;

pub use auth::{
    AnonymousAuthenticator, Authenticator, CachedAuthenticator, HttpAuthenticator, TokenCache,
};
pub use embedding::EmbeddingProvider;
pub use llm::{SamplingParams, TextGenerator, TokenStream};
pub use profile::{IloProfileClient, ProfileContextProvider};
pub use vector_store::EvidenceStore;
pub use web_search::{WebSearchProvider, WebSearchResult};
