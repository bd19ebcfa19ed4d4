//! Query router: constrained classifier call choosing an evidence source

use std::sync::Arc;

use crate::providers::{SamplingParams, TextGenerator};

use super::prompt::PromptBuilder;
use super::state::Route;

/// Classifies a question into a `Route`. Never fails.
pub struct QueryRouter {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
}

impl QueryRouter {
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
        Self {
            generator,
            max_tokens,
        }
    }

    /// Route a question; any client error or unparseable reply yields `VectorStore`
    pub async fn route(&self, question: &str) -> Route {
        let prompt = PromptBuilder::routing_prompt(question);
        let params = SamplingParams::deterministic(self.max_tokens);

        match self.generator.complete(&prompt, &params).await {
            Ok(reply) => match parse_route(&reply) {
                Some(route) => {
                    tracing::info!("Routing query to {}", route);
                    route
                }
                None => {
                    tracing::info!(
                        "Unclear routing reply '{}', defaulting to vectorstore",
                        reply.trim()
                    );
                    Route::VectorStore
                }
            },
            Err(e) => {
                tracing::warn!("Failed to route query, defaulting to vectorstore: {}", e);
                Route::VectorStore
            }
        }
    }
}

/// Case-insensitive label match on a classifier reply
pub fn parse_route(reply: &str) -> Option<Route> {
    let reply = reply.to_lowercase();
    if reply.contains("web_search") || reply.contains("web search") {
        Some(Route::WebSearch)
    } else if reply.contains("vectorstore") || reply.contains("vector store") {
        Some(Route::VectorStore)
    } else {
        None
    }
}
