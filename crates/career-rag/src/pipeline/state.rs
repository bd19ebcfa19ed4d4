//! Per-turn run state for the generation state machine

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::EvidenceChunk;

/// Evidence source chosen for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    VectorStore,
    WebSearch,
    DirectAnswer,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Route::VectorStore => "vectorstore",
            Route::WebSearch => "web_search",
            Route::DirectAnswer => "direct_answer",
        })
    }
}

/// States of the generation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Routing,
    Retrieving,
    Grading,
    Prompting,
    Streaming,
    Verifying,
    Regenerating,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// What the caller asks the pipeline to answer
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Raw question text; used for routing, retrieval and grading
    pub question: String,
    /// Structured user context, added to the answer prompt only
    pub user_context: Option<String>,
    /// Collection to retrieve from; the configured default when `None`
    pub collection: Option<String>,
    /// Enable routing, grading and groundedness verification
    pub adaptive: bool,
    /// Skip retrieval and answer from general knowledge
    pub direct: bool,
    pub conversation_id: String,
    pub user_id: Option<String>,
}

impl TurnRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            adaptive: true,
            ..Default::default()
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }
}

/// Output emitted while a turn runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Token(String),
    SourceUrl(String),
}

/// Mutable working state of one turn. Owned by the task running it.
#[derive(Debug)]
pub struct RunState {
    pub question: String,
    pub route: Route,
    pub chunks: Vec<EvidenceChunk>,
    pub generation: String,
    retries: u32,
    ceiling: u32,
    stage: Stage,
    trace: Vec<Stage>,
}

impl RunState {
    /// Fresh state; stages are recorded as they are entered
    pub fn new(question: impl Into<String>, ceiling: u32) -> Self {
        Self {
            question: question.into(),
            route: Route::VectorStore,
            chunks: Vec::new(),
            generation: String::new(),
            retries: 0,
            ceiling,
            stage: Stage::Routing,
            trace: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn enter(&mut self, stage: Stage) {
        tracing::trace!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
        self.trace.push(stage);
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Consume one regeneration; `false` once the ceiling is reached
    pub fn try_regenerate(&mut self) -> bool {
        if self.retries >= self.ceiling {
            return false;
        }
        self.retries += 1;
        true
    }

    pub fn into_outcome(self, grounded: Option<bool>) -> TurnOutcome {
        TurnOutcome {
            route: self.route,
            chunks_used: self.chunks.len(),
            regenerations: self.retries,
            text: self.generation,
            grounded,
            stages: self.trace,
        }
    }
}

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Effective route actually used
    pub route: Route,
    pub chunks_used: usize,
    pub regenerations: u32,
    /// Text of the last generation attempt
    pub text: String,
    /// Last groundedness verdict; `None` when verification was skipped or
    /// the grader call failed
    pub grounded: Option<bool>,
    /// Every state entered, in order
    pub stages: Vec<Stage>,
}

impl TurnOutcome {
    /// How many times generation streamed (first attempt plus regenerations)
    pub fn streaming_entries(&self) -> usize {
        self.stages.iter().filter(|s| **s == Stage::Streaming).count()
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_counter_never_exceeds_ceiling() {
        let mut state = RunState::new("q", 3);
        let granted = (0..10).filter(|_| state.try_regenerate()).count();
        assert_eq!(granted, 3);
        assert_eq!(state.retries(), state.ceiling());
    }

    #[test]
    fn test_zero_ceiling_never_regenerates() {
        let mut state = RunState::new("q", 0);
        assert!(!state.try_regenerate());
        assert_eq!(state.retries(), 0);
    }

    #[test]
    fn test_trace_records_stages() {
        let mut state = RunState::new("q", 1);
        state.enter(Stage::Retrieving);
        state.enter(Stage::Streaming);
        state.enter(Stage::Done);
        let outcome = state.into_outcome(None);
        assert_eq!(outcome.streaming_entries(), 1);
        assert!(outcome.visited(Stage::Retrieving));
        assert!(!outcome.visited(Stage::Verifying));
        assert_eq!(outcome.route.to_string(), "vectorstore");
    }
}
