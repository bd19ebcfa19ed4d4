//! career-rag: adaptive retrieval-augmented chat for career guidance
//!
//! A chat session streams questions in over a WebSocket; each turn is routed
//! (knowledge base, web search or direct answer), its evidence graded for
//! relevance, and the answer streamed back token by token. Answers are then
//! checked for groundedness and regenerated when the check fails.

pub mod bridge;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod pipeline;
pub mod providers;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{Session, StreamBridge};
pub use config::RagConfig;
pub use error::{Error, Result};
pub use pipeline::{Orchestrator, PipelineEvent, Route, Stage, TurnOutcome, TurnRequest};
pub use types::{ClientMessage, EvidenceChunk, ServerEvent, SourceTag, Turn};
