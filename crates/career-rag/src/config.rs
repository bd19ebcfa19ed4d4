//! Configuration for the chat pipeline and its collaborators

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Text generation / embedding backend
    pub llm: LlmConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Chunking configuration used at ingestion time
    pub chunking: ChunkingConfig,
    /// Evidence store configuration
    pub vector_db: VectorDbConfig,
    /// Web search configuration
    pub web_search: WebSearchConfig,
    /// Retrieval and generation pipeline tuning
    pub pipeline: PipelineConfig,
    /// Per-session stream bridge settings
    pub session: SessionConfig,
    /// Authentication service
    pub auth: AuthConfig,
    /// Career-assessment profile service
    pub profile: ProfileConfig,
    /// Administrative API guard
    pub admin: AdminConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file (if it exists), then apply
    /// environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            tracing::info!("Loading configuration from {}", path.display());
            toml::from_str::<RagConfig>(&content)?
        } else {
            tracing::info!("No config file at {}, using defaults", path.display());
            RagConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup function
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.llm.base_url = url;
        }
        if let Some(key) = lookup("TAVILY_API_KEY") {
            self.web_search.api_key = Some(key);
        }
        if let Some(flag) = lookup("WEB_SEARCH_ENABLED") {
            self.web_search.enabled = flag.eq_ignore_ascii_case("true");
        }
        if let Some(value) = lookup("RAG_TOP_K") {
            self.pipeline.top_k = parse_env("RAG_TOP_K", &value)?;
        }
        if let Some(value) = lookup("RAG_MAX_RETRIES") {
            self.pipeline.max_retries = parse_env("RAG_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("RAG_TEMPERATURE") {
            self.pipeline.temperature = parse_env("RAG_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("RAG_MAX_TOKENS") {
            self.pipeline.max_tokens = parse_env("RAG_MAX_TOKENS", &value)?;
        }
        if let Some(key) = lookup("ADMIN_API_KEY") {
            self.admin.api_key = Some(key);
        }
        if let Some(url) = lookup("AUTH_SERVICE_URL") {
            self.auth.base_url = url;
        }
        if let Some(url) = lookup("CHROMA_URL") {
            self.vector_db.url = url;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.top_k == 0 {
            return Err(Error::Config("pipeline.top_k must be at least 1".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        for (name, value) in [
            ("pipeline.temperature", self.pipeline.temperature),
            ("pipeline.regeneration_temperature", self.pipeline.regeneration_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within [0, 2], got {}", name, value)));
            }
        }
        if self.session.turn_timeout_secs == 0 {
            return Err(Error::Config("session.turn_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", key, value)))
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum request body size in bytes (document ingestion)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8091,
            enable_cors: true,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Which text generation backend to talk to
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Local Ollama server
    #[default]
    Ollama,
    /// OpenAI or any OpenAI-compatible endpoint
    OpenAi,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend provider
    pub backend: LlmBackend,
    /// Base URL of the backend
    pub base_url: String,
    /// API key (OpenAI backend)
    pub api_key: Option<String>,
    /// Generation model name
    pub generate_model: String,
    /// Embedding model name
    pub embed_model: String,
    /// Request timeout in seconds (non-streaming calls)
    pub timeout_secs: u64,
    /// Number of retries for failed non-streaming requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            generate_model: "llama3.2:3b".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl LlmConfig {
    /// Defaults for the hosted OpenAI API
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            base_url: "https://api.openai.com".to_string(),
            api_key: Some(api_key.into()),
            generate_model: "gpt-4o".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
            ..Default::default()
        }
    }

    /// Request timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding dimensions (768 for nomic-embed-text, 1536 for text-embedding-3-small)
    pub dimensions: usize,
    /// Batch size for ingestion-time embedding
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 768,
            batch_size: 32,
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Minimum chunk size (skip smaller chunks)
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 20,
        }
    }
}

/// Evidence store backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local brute-force index
    #[default]
    Memory,
    /// Remote Chroma server
    Chroma,
}

/// Evidence store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// Backend provider
    pub backend: StoreBackend,
    /// Base URL for remote backends
    pub url: String,
    /// Collection used when a turn does not name one
    pub default_collection: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "http://localhost:8000".to_string(),
            default_collection: "academy".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Web search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    /// Enable web search as a primary route and as a fallback
    pub enabled: bool,
    /// Tavily API key (search is disabled without one)
    pub api_key: Option<String>,
    /// Search endpoint
    pub base_url: String,
    /// Snippets requested per search
    pub max_results: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: "https://api.tavily.com/search".to_string(),
            max_results: 3,
            timeout_secs: 30,
        }
    }
}

impl WebSearchConfig {
    /// Search is usable only when enabled and keyed
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Retrieval and generation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Route, grade and verify by default
    pub adaptive: bool,
    /// Nearest chunks requested from the evidence store
    pub top_k: usize,
    /// Regeneration ceiling after a failed groundedness check
    pub max_retries: u32,
    /// Sampling temperature for the first answer attempt
    pub temperature: f32,
    /// Sampling temperature for regenerations
    pub regeneration_temperature: f32,
    /// Token limit for answers
    pub max_tokens: u32,
    /// Token limit for the routing classifier
    pub classifier_max_tokens: u32,
    /// Token limit for yes/no graders
    pub grader_max_tokens: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            adaptive: true,
            top_k: 5,
            max_retries: 3,
            temperature: 0.7,
            regeneration_temperature: 0.3,
            max_tokens: 1000,
            classifier_max_tokens: 20,
            grader_max_tokens: 10,
        }
    }
}

/// Stream bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for a single turn
    pub turn_timeout_secs: u64,
    /// Turns that may wait behind the one in flight
    pub queue_depth: usize,
    /// Buffered outbound events per session
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn_timeout_secs: 60,
            queue_depth: 16,
            event_buffer: 64,
        }
    }
}

impl SessionConfig {
    /// Turn deadline as a duration
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

/// Authentication service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a valid bearer token for chat sessions
    pub enabled: bool,
    /// Auth service base URL
    pub base_url: String,
    /// How long a validated token stays cached
    pub token_ttl_secs: u64,
    /// Validation request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8081".to_string(),
            token_ttl_secs: 300,
            timeout_secs: 5,
        }
    }
}

/// Career-assessment profile service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Base URL; profile context is skipped when unset
    pub base_url: Option<String>,
}

/// Admin API guard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Required `x-api-key` value; open when unset
    pub api_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.top_k, 5);
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.session.turn_timeout(), Duration::from_secs(60));
        assert_eq!(config.vector_db.default_collection, "academy");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RagConfig = toml::from_str(
            r#"
            [pipeline]
            top_k = 8

            [web_search]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.top_k, 8);
        assert_eq!(config.pipeline.max_retries, 3);
        assert!(!config.web_search.enabled);
        assert_eq!(config.server.port, 8091);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TAVILY_API_KEY", "tvly-123"),
            ("RAG_TOP_K", "7"),
            ("WEB_SEARCH_ENABLED", "FALSE"),
        ]);
        let mut config = RagConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.pipeline.top_k, 7);
        assert_eq!(config.web_search.api_key.as_deref(), Some("tvly-123"));
        assert!(!config.web_search.enabled);
        assert!(!config.web_search.is_active());
    }

    #[test]
    fn test_bad_numeric_override_is_config_error() {
        let mut config = RagConfig::default();
        let err = config
            .apply_env(|key| (key == "RAG_MAX_RETRIES").then(|| "three".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_overlap_and_temperature() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.pipeline.regeneration_temperature = 3.5;
        assert!(config.validate().is_err());
    }
}
