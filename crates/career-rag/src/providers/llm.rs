//! Text generation provider trait

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::Result;

/// Incremental text emitted by a generation call, in production order
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Sampling parameters for one generation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
}

impl SamplingParams {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            top_p: None,
        }
    }

    /// Zero-temperature sampling for classifier and grader calls
    pub fn deterministic(max_tokens: u32) -> Self {
        Self::new(0.0, max_tokens)
    }
}

/// Trait for streaming text completion
///
/// Implementations:
/// - `OllamaGenerator`: Local Ollama server (`/api/generate`)
/// - `OpenAiGenerator`: OpenAI-compatible chat completions
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a generation stream for a prompt.
    ///
    /// An `Err` here means the stream could not be started. Errors yielded
    /// by the stream itself are mid-stream transport failures. Dropping the
    /// stream abandons the underlying request.
    async fn stream(&self, prompt: &str, params: &SamplingParams) -> Result<TokenStream>;

    /// Run a generation to completion and return the full text
    async fn complete(&self, prompt: &str, params: &SamplingParams) -> Result<String> {
        let mut stream = self.stream(prompt, params).await?;
        let mut text = String::new();
        while let Some(token) = stream.next().await {
            text.push_str(&token?);
        }
        Ok(text)
    }

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
