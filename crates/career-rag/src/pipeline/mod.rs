//! Adaptive retrieval-augmented generation pipeline

pub mod grader;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod router;
pub mod state;

pub use grader::Grader;
pub use orchestrator::{GenerationSettings, Orchestrator};
pub use prompt::{AnswerPrompt, Language, PromptBuilder, PromptShape, Verdict};
pub use retrieval::{Retrieval, RetrievalEngine};
pub use router::QueryRouter;
pub use state::{PipelineEvent, Route, RunState, Stage, TurnOutcome, TurnRequest};
