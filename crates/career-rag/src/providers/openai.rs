//! OpenAI-compatible chat completion and embedding providers

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;
use super::llm::{SamplingParams, TextGenerator, TokenStream};
use super::stream::{body_lines, sse_data};

/// Shared HTTP client for an OpenAI-compatible endpoint
pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config("llm.api_key is required for the openai backend".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> &str {
        self.config.api_key.as_deref().unwrap_or_default()
    }

    /// Open a streaming chat completion (SSE `data:` records)
    pub async fn chat_stream(&self, prompt: &str, params: &SamplingParams) -> Result<TokenStream> {
        let request = ChatRequest {
            model: &self.config.generate_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        };

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(self.api_key())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::GenerationStart(format!("Chat request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::GenerationStart(format!(
                "Chat completion failed: HTTP {} - {}",
                status, body
            )));
        }

        let tokens = body_lines(response.bytes_stream())
            .scan(false, |done, line| {
                if *done {
                    return futures::future::ready(None);
                }
                let item = line.map(|line| match sse_data(&line) {
                    Some("[DONE]") => {
                        *done = true;
                        String::new()
                    }
                    Some(data) => match serde_json::from_str::<ChatChunk>(data) {
                        Ok(chunk) => chunk
                            .choices
                            .into_iter()
                            .filter_map(|c| c.delta.content)
                            .collect(),
                        Err(e) => {
                            tracing::debug!("Skipping malformed SSE record: {}", e);
                            String::new()
                        }
                    },
                    None => String::new(),
                });
                futures::future::ready(Some(item))
            })
            .filter(|item| futures::future::ready(!matches!(item, Ok(t) if t.is_empty())))
            .boxed();

        Ok(tokens)
    }

    /// Embed a batch of texts, returned in input order
    pub async fn embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.embed_model,
            input: texts,
        };

        let response = self
            .client
            .post(self.url("/v1/embeddings"))
            .bearer_auth(self.api_key())
            .timeout(self.config.timeout())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::embedding(format!(
                "Embedding failed: HTTP {}",
                response.status()
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Failed to parse embedding response: {}", e)))?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != texts.len() {
            return Err(Error::embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    pub async fn health_check(&self) -> Result<bool> {
        match self
            .client
            .get(self.url("/v1/models"))
            .bearer_auth(self.api_key())
            .timeout(self.config.timeout())
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// Text generator backed by chat completions
pub struct OpenAiGenerator {
    client: Arc<OpenAiClient>,
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn stream(&self, prompt: &str, params: &SamplingParams) -> Result<TokenStream> {
        self.client.chat_stream(prompt, params).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.client.config.generate_model
    }
}

/// Embedding provider backed by `/v1/embeddings`
pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    dimensions: usize,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client
            .embeddings(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::embedding("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.client.embeddings(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Build a generator and embedder sharing one OpenAI client
pub fn openai_providers(
    config: &LlmConfig,
    dimensions: usize,
) -> Result<(OpenAiGenerator, OpenAiEmbedder)> {
    let client = Arc::new(OpenAiClient::new(config)?);
    Ok((
        OpenAiGenerator {
            client: Arc::clone(&client),
        },
        OpenAiEmbedder { client, dimensions },
    ))
}
