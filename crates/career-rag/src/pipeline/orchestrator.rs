//! Generation orchestrator: the per-turn retrieval-augmented state machine
//!
//! `Routing -> Retrieving -> Grading -> Prompting -> Streaming -> Verifying`
//! then either `Done` or `Regenerating -> Streaming`. Tokens are forwarded as
//! they are produced; a failed groundedness check regenerates the full answer,
//! so the caller sees a second burst of tokens.

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::providers::{SamplingParams, TextGenerator};
use crate::types::SourceTag;

use super::grader::Grader;
use super::prompt::{PromptBuilder, PromptShape, Verdict};
use super::retrieval::RetrievalEngine;
use super::router::QueryRouter;
use super::state::{PipelineEvent, Route, RunState, Stage, TurnOutcome, TurnRequest};

/// Sampling and retry settings for answer generation
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub default_collection: String,
    pub max_retries: u32,
    pub temperature: f32,
    pub regeneration_temperature: f32,
    pub max_tokens: u32,
}

impl GenerationSettings {
    pub fn from_config(pipeline: &PipelineConfig, default_collection: &str) -> Self {
        Self {
            default_collection: default_collection.to_string(),
            max_retries: pipeline.max_retries,
            temperature: pipeline.temperature,
            regeneration_temperature: pipeline.regeneration_temperature,
            max_tokens: pipeline.max_tokens,
        }
    }
}

/// Run `fut` unless `cancel` fires first
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    router: QueryRouter,
    retrieval: RetrievalEngine,
    grader: Grader,
    prompts: PromptBuilder,
    settings: GenerationSettings,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        router: QueryRouter,
        retrieval: RetrievalEngine,
        grader: Grader,
        prompts: PromptBuilder,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            generator,
            router,
            retrieval,
            grader,
            prompts,
            settings,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Answer one turn, sending tokens and source links to `events`.
    ///
    /// Fails only when the first generation stream cannot be started or the
    /// run is cancelled (token fired or `events` receiver dropped).
    pub async fn run(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        let mut state = RunState::new(request.question.clone(), self.settings.max_retries);

        match self.drive(&request, &mut state, &events, &cancel).await {
            Ok(grounded) => {
                state.enter(Stage::Done);
                tracing::info!(
                    "Turn {} done: route={}, chunks={}, regenerations={}",
                    request.conversation_id,
                    state.route,
                    state.chunks.len(),
                    state.retries()
                );
                Ok(state.into_outcome(grounded))
            }
            Err(e) => {
                let stage = state.stage();
                state.enter(Stage::Failed);
                if e.is_cancelled() {
                    tracing::info!("Turn {} cancelled during {:?}", request.conversation_id, stage);
                } else {
                    tracing::error!("Turn {} failed during {:?}: {}", request.conversation_id, stage, e);
                }
                Err(e)
            }
        }
    }

    /// Walk the state machine; returns the last groundedness verdict
    async fn drive(
        &self,
        request: &TurnRequest,
        state: &mut RunState,
        events: &mpsc::Sender<PipelineEvent>,
        cancel: &CancellationToken,
    ) -> Result<Option<bool>> {
        let question = request.question.as_str();
        let collection = request
            .collection
            .as_deref()
            .unwrap_or(&self.settings.default_collection);

        // Routing
        state.route = if request.direct {
            Route::DirectAnswer
        } else if request.adaptive {
            state.enter(Stage::Routing);
            cancellable(cancel, self.router.route(question)).await?
        } else {
            Route::VectorStore
        };

        // Retrieving / Grading
        if state.route != Route::DirectAnswer {
            state.enter(Stage::Retrieving);
            let mut retrieval =
                cancellable(cancel, self.retrieval.retrieve(question, collection, state.route)).await?;

            if request.adaptive {
                state.enter(Stage::Grading);
                retrieval = cancellable(cancel, self.retrieval.grade(question, retrieval)).await?;
            }

            if retrieval.route != state.route {
                tracing::info!("Effective route changed from {} to {}", state.route, retrieval.route);
            }
            state.route = retrieval.route;
            state.chunks = retrieval.chunks;
        }

        for url in state
            .chunks
            .iter()
            .filter(|c| c.source == SourceTag::WebSearch)
            .filter_map(|c| c.source_url())
        {
            Self::emit(events, cancel, PipelineEvent::SourceUrl(url.to_string())).await?;
        }

        // Prompting
        state.enter(Stage::Prompting);
        let prompt = self
            .prompts
            .answer_prompt(question, &state.chunks, request.user_context.as_deref());
        tracing::debug!(
            "Using {:?} prompt with {} chunks ({:?})",
            prompt.shape,
            state.chunks.len(),
            prompt.language
        );

        let verify = request.adaptive && prompt.shape == PromptShape::Grounded;
        let mut params = SamplingParams::new(self.settings.temperature, self.settings.max_tokens);
        let mut grounded = None;

        loop {
            state.enter(Stage::Streaming);
            match self.stream_attempt(&prompt.text, &params, events, cancel).await {
                Ok(text) => state.generation = text,
                Err(Error::GenerationStart(msg)) if state.retries() > 0 => {
                    tracing::warn!("Regeneration could not start, keeping previous answer: {}", msg);
                    break;
                }
                Err(e) => return Err(e),
            }

            if !verify {
                break;
            }

            state.enter(Stage::Verifying);
            let verdict =
                cancellable(cancel, self.grader.grounded(&state.generation, &state.chunks)).await?;

            match verdict {
                Ok(Verdict::Yes) => {
                    tracing::info!("Generation is grounded in {} chunks", state.chunks.len());
                    grounded = Some(true);
                    break;
                }
                Ok(verdict @ (Verdict::No | Verdict::Unclear)) => {
                    // Anything short of an explicit "yes" counts as ungrounded
                    if verdict == Verdict::Unclear {
                        tracing::info!("Unclear groundedness verdict, treating as not grounded");
                    }
                    grounded = Some(false);
                    if !state.try_regenerate() {
                        tracing::warn!(
                            "Generation may contain hallucinations; retry ceiling ({}) reached, keeping last answer",
                            state.ceiling()
                        );
                        break;
                    }
                    tracing::warn!(
                        "Response may contain hallucinations, regenerating (attempt {}/{})",
                        state.retries(),
                        state.ceiling()
                    );
                    state.enter(Stage::Regenerating);
                    params.temperature = self.settings.regeneration_temperature;
                }
                Err(e) => {
                    tracing::warn!("Failed to check groundedness, accepting generation: {}", e);
                    break;
                }
            }
        }

        Ok(grounded)
    }

    /// Stream one generation attempt, forwarding every token.
    ///
    /// A transport error after the stream has started ends the attempt with
    /// the text received so far.
    async fn stream_attempt(
        &self,
        prompt: &str,
        params: &SamplingParams,
        events: &mpsc::Sender<PipelineEvent>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut stream = cancellable(cancel, self.generator.stream(prompt, params))
            .await?
            .map_err(|e| match e {
                Error::GenerationStart(_) => e,
                other => Error::GenerationStart(other.to_string()),
            })?;

        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(token)) => {
                    text.push_str(&token);
                    Self::emit(events, cancel, PipelineEvent::Token(token)).await?;
                }
                Some(Err(e)) => {
                    tracing::warn!("Generation stream interrupted after {} bytes: {}", text.len(), e);
                    break;
                }
                None => break,
            }
        }
        Ok(text)
    }

    /// Send an event, honoring transport backpressure and cancellation
    async fn emit(
        events: &mpsc::Sender<PipelineEvent>,
        cancel: &CancellationToken,
        event: PipelineEvent,
    ) -> Result<()> {
        match cancellable(cancel, events.send(event)).await? {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        pipeline, CallKind, CountingSearch, FixedStore, ScriptedGenerator,
    };
    use crate::types::EvidenceChunk;
    use std::time::Duration;

    async fn collect(
        orchestrator: &Orchestrator,
        request: TurnRequest,
    ) -> (Result<TurnOutcome>, Vec<PipelineEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = orchestrator.run(request, tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn tokens(events: &[PipelineEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Token(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    fn hust_chunk() -> EvidenceChunk {
        EvidenceChunk::knowledge(
            "hust-2024-it",
            "Điểm chuẩn ngành CNTT (IT1) Đại học Bách khoa Hà Nội năm 2024 là 28.53.",
            0.92,
        )
        .with_metadata("source", "diem-chuan-2024.pdf")
    }

    #[tokio::test]
    async fn test_grounded_vietnamese_turn() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .route_reply("vectorstore")
                .relevance_reply("yes")
                .grounded_replies(&["yes"])
                .answer(&["Điểm", " chuẩn", " CNTT", " là", " 28.53"]),
        );
        let store = FixedStore::new().with_collection("university-scores", vec![hust_chunk()]);
        let orchestrator = pipeline(generator.clone(), store, None);

        let request = TurnRequest::new("Điểm chuẩn ngành CNTT tại HUST 2024?")
            .with_collection("university-scores");
        let (outcome, events) = collect(&orchestrator, request).await;
        let outcome = outcome.unwrap();

        assert_eq!(
            tokens(&events),
            vec!["Điểm", " chuẩn", " CNTT", " là", " 28.53"]
        );
        assert_eq!(outcome.route, Route::VectorStore);
        assert_eq!(outcome.regenerations, 0);
        assert_eq!(outcome.chunks_used, 1);
        assert_eq!(outcome.grounded, Some(true));
        assert_eq!(outcome.text, "Điểm chuẩn CNTT là 28.53");
        assert_eq!(
            outcome.stages,
            vec![
                Stage::Routing,
                Stage::Retrieving,
                Stage::Grading,
                Stage::Prompting,
                Stage::Streaming,
                Stage::Verifying,
                Stage::Done
            ]
        );

        let answer_prompt = &generator.prompts(CallKind::Answer)[0];
        assert!(answer_prompt.contains("[Nguồn 1 - diem-chuan-2024.pdf]"));
    }

    #[tokio::test]
    async fn test_empty_collection_without_web_uses_general_prompt() {
        let generator = Arc::new(ScriptedGenerator::new().answer(&["Tôi", " nghĩ"]));
        let store = FixedStore::new().with_collection("university-scores", vec![]);
        let orchestrator = pipeline(generator.clone(), store, None);

        let request = TurnRequest::new("Điểm chuẩn ngành CNTT tại HUST 2024?")
            .with_collection("university-scores");
        let (outcome, events) = collect(&orchestrator, request).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.route, Route::VectorStore);
        assert_eq!(outcome.chunks_used, 0);
        assert_eq!(outcome.grounded, None);
        assert!(!outcome.visited(Stage::Verifying));
        assert_eq!(tokens(&events), vec!["Tôi", " nghĩ"]);
        assert_eq!(generator.count(CallKind::Grounded), 0);
        assert_eq!(generator.count(CallKind::Relevance), 0);

        let answer_prompt = &generator.prompts(CallKind::Answer)[0];
        assert!(answer_prompt.contains("câu trả lời chung"));
        assert!(!answer_prompt.contains("Nguồn"));
    }

    #[tokio::test]
    async fn test_bounded_regeneration_reaches_done() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .relevance_reply("yes")
                .grounded_default("no")
                .answer_default(&["x"]),
        );
        let store = FixedStore::new().with_collection("academy", vec![hust_chunk()]);
        let orchestrator = pipeline(generator.clone(), store, None);

        let (outcome, events) = collect(&orchestrator, TurnRequest::new("q")).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.regenerations, 3);
        assert_eq!(outcome.streaming_entries(), 4);
        assert_eq!(outcome.grounded, Some(false));
        assert_eq!(outcome.stages.last(), Some(&Stage::Done));
        assert_eq!(generator.count(CallKind::Answer), 4);
        assert_eq!(generator.count(CallKind::Grounded), 4);
        // Failed attempts are not retracted
        assert_eq!(tokens(&events).len(), 4);

        let temps: Vec<f32> = generator
            .calls()
            .iter()
            .filter(|c| c.kind == CallKind::Answer)
            .map(|c| c.params.temperature)
            .collect();
        assert_eq!(temps, vec![0.7, 0.3, 0.3, 0.3]);
    }

    #[tokio::test]
    async fn test_regeneration_stops_on_positive_verdict() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .relevance_reply("yes")
                .grounded_replies(&["no", "yes"])
                .answer(&["first"])
                .answer(&["second"]),
        );
        let store = FixedStore::new().with_collection("academy", vec![hust_chunk()]);
        let orchestrator = pipeline(generator, store, None);

        let (outcome, events) = collect(&orchestrator, TurnRequest::new("q")).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.regenerations, 1);
        assert_eq!(outcome.text, "second");
        assert_eq!(tokens(&events), vec!["first", "second"]);
        assert!(outcome.visited(Stage::Regenerating));
    }

    #[tokio::test]
    async fn test_reply_without_yes_counts_as_ungrounded() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .relevance_reply("yes")
                .grounded_replies(&["The answer is not supported by the facts", "yes"])
                .answer(&["first"])
                .answer(&["second"]),
        );
        let store = FixedStore::new().with_collection("academy", vec![hust_chunk()]);
        let orchestrator = pipeline(generator.clone(), store, None);

        let (outcome, _) = collect(&orchestrator, TurnRequest::new("q")).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.regenerations, 1);
        assert_eq!(outcome.text, "second");
        assert_eq!(outcome.grounded, Some(true));
        assert_eq!(generator.count(CallKind::Answer), 2);
    }

    #[tokio::test]
    async fn test_verification_error_accepts_generation() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .relevance_reply("yes")
                .fail_grounded()
                .answer(&["only"]),
        );
        let store = FixedStore::new().with_collection("academy", vec![hust_chunk()]);
        let orchestrator = pipeline(generator.clone(), store, None);

        let (outcome, _) = collect(&orchestrator, TurnRequest::new("q")).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.regenerations, 0);
        assert_eq!(outcome.grounded, None);
        assert!(outcome.visited(Stage::Verifying));
        assert_eq!(generator.count(CallKind::Answer), 1);
    }

    #[tokio::test]
    async fn test_start_failure_is_fatal() {
        let generator = Arc::new(ScriptedGenerator::new().fail_answer_start());
        let orchestrator = pipeline(generator, FixedStore::new(), None);

        let (outcome, events) = collect(&orchestrator, TurnRequest::new("q").adaptive(false)).await;
        assert!(matches!(outcome, Err(Error::GenerationStart(_))));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_regeneration_start_failure_keeps_previous_text() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .relevance_reply("yes")
                .grounded_default("no")
                .answer(&["draft"])
                .fail_answer_start(),
        );
        let store = FixedStore::new().with_collection("academy", vec![hust_chunk()]);
        let orchestrator = pipeline(generator, store, None);

        let (outcome, _) = collect(&orchestrator, TurnRequest::new("q")).await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.text, "draft");
        assert_eq!(outcome.stages.last(), Some(&Stage::Done));
    }

    #[tokio::test]
    async fn test_non_adaptive_skips_routing_grading_and_verification() {
        let generator = Arc::new(ScriptedGenerator::new().answer(&["A", "B", "C"]));
        let store = FixedStore::new().with_collection("academy", vec![hust_chunk()]);
        let orchestrator = pipeline(generator.clone(), store, None);

        let (outcome, events) = collect(&orchestrator, TurnRequest::new("q").adaptive(false)).await;
        let outcome = outcome.unwrap();

        assert_eq!(tokens(&events), vec!["A", "B", "C"]);
        assert!(!outcome.visited(Stage::Routing));
        assert!(!outcome.visited(Stage::Grading));
        assert!(!outcome.visited(Stage::Verifying));
        assert_eq!(generator.count(CallKind::Route), 0);
        assert_eq!(generator.count(CallKind::Relevance), 0);
        assert_eq!(outcome.chunks_used, 1);
    }

    #[tokio::test]
    async fn test_direct_answer_skips_retrieval() {
        let generator = Arc::new(ScriptedGenerator::new().answer(&["hi"]));
        let store = FixedStore::new().with_collection("academy", vec![hust_chunk()]);
        let orchestrator = pipeline(generator.clone(), store, None);

        let mut request = TurnRequest::new("hello");
        request.direct = true;
        let (outcome, _) = collect(&orchestrator, request).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.route, Route::DirectAnswer);
        assert!(!outcome.visited(Stage::Retrieving));
        assert_eq!(outcome.chunks_used, 0);
    }

    #[tokio::test]
    async fn test_web_route_emits_source_urls_first() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .route_reply("web_search")
                .relevance_reply("yes")
                .grounded_replies(&["yes"])
                .answer(&["ok"]),
        );
        let web = Arc::new(CountingSearch::with_results(2));
        let orchestrator = pipeline(generator, FixedStore::new(), Some(web));

        let (outcome, events) = collect(&orchestrator, TurnRequest::new("latest news")).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.route, Route::WebSearch);
        assert_eq!(
            events,
            vec![
                PipelineEvent::SourceUrl("https://example.vn/0".to_string()),
                PipelineEvent::SourceUrl("https://example.vn/1".to_string()),
                PipelineEvent::Token("ok".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_text() {
        let generator = Arc::new(ScriptedGenerator::new().answer_then_error(&["par", "tial"]));
        let orchestrator = pipeline(generator, FixedStore::new(), None);

        let (outcome, events) = collect(&orchestrator, TurnRequest::new("q").adaptive(false)).await;
        assert_eq!(outcome.unwrap().text, "partial");
        assert_eq!(tokens(&events), vec!["par", "tial"]);
    }

    #[tokio::test]
    async fn test_cancellation_drops_generation_stream() {
        let generator = Arc::new(ScriptedGenerator::new().hanging_answer(&["A"]));
        let orchestrator = Arc::new(pipeline(generator.clone(), FixedStore::new(), None));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);

        let handle = {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(TurnRequest::new("q").adaptive(false), tx, cancel)
                    .await
            })
        };

        assert_eq!(rx.recv().await, Some(PipelineEvent::Token("A".to_string())));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), generator.stream_dropped())
            .await
            .expect("generation stream was not dropped");
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(rx.recv().await, None);
    }
}
