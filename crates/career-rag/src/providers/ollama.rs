//! Ollama client for streaming generation and embeddings

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;
use super::llm::{SamplingParams, TextGenerator, TokenStream};
use super::stream::body_lines;

/// Ollama API client with automatic retry for non-streaming calls
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    /// Create a new Ollama client.
    ///
    /// Only the connect phase has a client-wide timeout; streamed generations
    /// are bounded by the caller's turn deadline instead.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = self.config.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        let delay = Duration::from_secs(2u64.pow(attempt));
                        tracing::warn!(
                            "Request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::llm("Unknown error")))
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.client.get(&url).timeout(self.config.timeout()).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Generate an embedding with retry
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);

        self.retry_request(|| {
            let request = EmbedRequest {
                model: self.config.embed_model.clone(),
                prompt: text.to_string(),
            };
            let url = url.clone();

            async move {
                let response = self
                    .client
                    .post(&url)
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

                let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                    Error::embedding(format!("Failed to parse embedding response: {}", e))
                })?;

                Ok(embed_response.embedding)
            }
        })
        .await
    }

    /// Open a streaming generation (`/api/generate`, NDJSON records)
    pub async fn generate_stream(&self, prompt: &str, params: &SamplingParams) -> Result<TokenStream> {
        let url = format!("{}/api/generate", self.config.base_url);
        let request = GenerateRequest {
            model: &self.config.generate_model,
            prompt,
            stream: true,
            options: GenerateOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
                top_p: params.top_p,
            },
        };

        tracing::debug!(
            "Opening Ollama stream with model {} (temperature {})",
            self.config.generate_model,
            params.temperature
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::GenerationStart(format!("Stream request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::GenerationStart(format!(
                "Stream failed: HTTP {} - {}",
                status, body
            )));
        }

        Ok(ndjson_tokens(body_lines(response.bytes_stream())))
    }
}

/// Map NDJSON generate records to tokens, stopping after the `done` record
fn ndjson_tokens(lines: BoxStream<'static, Result<String>>) -> TokenStream {
    lines
        .scan(false, |done, line| {
            if *done {
                return futures::future::ready(None);
            }
            let item = line.and_then(|line| match serde_json::from_str::<StreamChunk>(&line) {
                Ok(chunk) => {
                    *done = chunk.done;
                    match chunk.error {
                        Some(err) => Err(Error::llm(err)),
                        None => Ok(chunk.response),
                    }
                }
                Err(e) => {
                    tracing::debug!("Skipping malformed Ollama record: {}", e);
                    Ok(String::new())
                }
            });
            futures::future::ready(Some(item))
        })
        .filter(|item| futures::future::ready(!matches!(item, Ok(t) if t.is_empty())))
        .boxed()
}

/// Ollama embedding provider
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn from_client(client: Arc<OllamaClient>, dimensions: usize) -> Self {
        Self { client, dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama text generator
pub struct OllamaGenerator {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaGenerator {
    pub fn from_client(client: Arc<OllamaClient>) -> Self {
        let model = client.config.generate_model.clone();
        Self { client, model }
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn stream(&self, prompt: &str, params: &SamplingParams) -> Result<TokenStream> {
        self.client.generate_stream(prompt, params).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build a generator and embedder sharing one Ollama client
pub fn ollama_providers(
    config: &LlmConfig,
    dimensions: usize,
) -> Result<(OllamaGenerator, OllamaEmbedder)> {
    let client = Arc::new(OllamaClient::new(config)?);
    Ok((
        OllamaGenerator::from_client(Arc::clone(&client)),
        OllamaEmbedder::from_client(client, dimensions),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn tokens_from(chunks: &[&'static str]) -> Vec<std::result::Result<String, String>> {
        let body: Vec<std::result::Result<Bytes, std::io::Error>> =
            chunks.iter().copied().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        ndjson_tokens(body_lines(futures::stream::iter(body)))
            .map(|item| item.map_err(|e| e.to_string()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_tokens_split_across_network_chunks() {
        let tokens = tokens_from(&[
            "{\"response\":\"Điểm\",\"done\":false}\n{\"resp",
            "onse\":\" chuẩn\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ])
        .await;
        assert_eq!(tokens, vec![Ok("Điểm".to_string()), Ok(" chuẩn".to_string())]);
    }

    #[tokio::test]
    async fn test_records_after_done_are_ignored() {
        let tokens = tokens_from(&[
            "{\"response\":\"A\",\"done\":true}\n",
            "{\"response\":\"B\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(tokens, vec![Ok("A".to_string())]);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let tokens = tokens_from(&[
            "not json\n",
            "{\"response\":\"A\"}\n",
            "{\"response\":\"B\",\"done\":true}",
        ])
        .await;
        assert_eq!(tokens, vec![Ok("A".to_string()), Ok("B".to_string())]);
    }

    #[tokio::test]
    async fn test_error_record_surfaces_as_error() {
        let tokens = tokens_from(&[
            "{\"response\":\"A\"}\n",
            "{\"error\":\"model 'llama3' not found\"}\n",
        ])
        .await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], Ok("A".to_string()));
        assert!(tokens[1].as_ref().unwrap_err().contains("model 'llama3' not found"));
    }
}
