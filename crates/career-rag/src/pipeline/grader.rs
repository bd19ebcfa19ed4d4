//! Yes/no graders built on deterministic generation calls

use std::sync::Arc;

use crate::error::Result;
use crate::providers::{SamplingParams, TextGenerator};
use crate::types::EvidenceChunk;

use super::prompt::{PromptBuilder, Verdict};

#[derive(Clone)]
pub struct Grader {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
}

impl Grader {
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
        Self {
            generator,
            max_tokens,
        }
    }

    async fn ask(&self, prompt: &str) -> Result<Verdict> {
        let params = SamplingParams::deterministic(self.max_tokens);
        let reply = self.generator.complete(prompt, &params).await?;
        Ok(Verdict::parse(&reply))
    }

    /// Is this chunk relevant to the question?
    pub async fn relevance(&self, question: &str, chunk: &EvidenceChunk) -> Result<Verdict> {
        self.ask(&PromptBuilder::relevance_prompt(question, chunk)).await
    }

    /// Is this generation supported by the chunks?
    pub async fn grounded(&self, generation: &str, chunks: &[EvidenceChunk]) -> Result<Verdict> {
        self.ask(&PromptBuilder::groundedness_prompt(generation, chunks))
            .await
    }
}
