//! Tavily web search client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::WebSearchConfig;
use crate::error::{Error, Result};

use super::web_search::{WebSearchProvider, WebSearchResult};

/// Tavily API client for web search
pub struct TavilyClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilyResponse {
    fn into_results(self, max_results: usize) -> Vec<WebSearchResult> {
        self.results
            .into_iter()
            .take(max_results)
            .map(|r| WebSearchResult {
                title: r.title,
                url: r.url,
                snippet: r.content,
            })
            .collect()
    }
}

impl TavilyClient {
    /// Create a new Tavily client; requires an API key
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("web_search.api_key is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: config.base_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl WebSearchProvider for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchResult>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            search_depth: "basic",
            max_results,
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::web_search(format!("Failed to send Tavily search request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::web_search(format!("Tavily API error {}: {}", status, body)));
        }

        let tavily_response: TavilyResponse = response
            .json()
            .await
            .map_err(|e| Error::web_search(format!("Failed to parse Tavily response: {}", e)))?;

        Ok(tavily_response.into_results(max_results))
    }

    fn name(&self) -> &str {
        "tavily"
    }
}
