//! Web search provider trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Return up to `max_results` snippets for a query
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchResult>>;

    fn name(&self) -> &str;
}
