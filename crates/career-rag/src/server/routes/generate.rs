//! Backend-facing streaming generation over Server-Sent Events
//!
//! Events: `sourceUrl` and `token` while the turn runs, then exactly one of
//! `done` (with a run summary) or `error`. Dropping the response cancels the
//! run.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pipeline::{PipelineEvent, TurnRequest};
use crate::server::state::AppState;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub collection: Option<String>,
    /// Route, grade and verify; the configured default when absent
    #[serde(default)]
    pub adaptive: Option<bool>,
    /// `false` answers directly without retrieval
    #[serde(default = "default_true")]
    pub rag: bool,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Structured user context for the answer prompt
    #[serde(default)]
    pub context: Option<String>,
}

fn sse_event(name: &str, data: serde_json::Value) -> Option<Event> {
    Event::default().event(name).json_data(&data).ok()
}

fn pipeline_event(event: PipelineEvent) -> Option<Event> {
    match event {
        PipelineEvent::Token(token) => sse_event("token", json!({ "token": token })),
        PipelineEvent::SourceUrl(url) => sse_event("sourceUrl", json!({ "url": url })),
    }
}

/// POST /api/generate - Stream one answer
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    if request.prompt.trim().is_empty() {
        return Err(Error::validation("prompt must not be empty"));
    }

    let config = state.config();
    let turn = TurnRequest {
        question: request.prompt,
        user_context: request.context,
        collection: request.collection,
        adaptive: request.adaptive.unwrap_or(config.pipeline.adaptive),
        direct: !request.rag,
        conversation_id: request.conversation_id,
        user_id: request.user_id,
    };
    tracing::info!(
        "Generate request (conversation: {}, adaptive: {}, rag: {})",
        turn.conversation_id,
        turn.adaptive,
        !turn.direct
    );

    let buffer = config.session.event_buffer.max(1);
    let timeout = config.session.turn_timeout();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (tx, rx) = mpsc::channel::<Event>(buffer);
    let orchestrator = state.orchestrator().clone();

    tokio::spawn(async move {
        let (events_tx, mut events_rx) = mpsc::channel::<PipelineEvent>(buffer);

        let run = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = tokio::time::timeout(
                    timeout,
                    orchestrator.run(turn, events_tx, cancel.clone()),
                ) => result.unwrap_or(Err(Error::Timeout(timeout))),
            }
        };
        let forward = async {
            while let Some(event) = events_rx.recv().await {
                let Some(event) = pipeline_event(event) else { continue };
                if tx.send(event).await.is_err() {
                    cancel.cancel();
                    break;
                }
            }
        };
        let (result, ()) = tokio::join!(run, forward);

        let last = match result {
            Ok(outcome) => sse_event(
                "done",
                json!({
                    "route": outcome.route.to_string(),
                    "chunksUsed": outcome.chunks_used,
                    "regenerations": outcome.regenerations,
                    "grounded": outcome.grounded,
                }),
            ),
            Err(e) if e.is_cancelled() => {
                tracing::info!("Generate request cancelled by client");
                None
            }
            Err(e) => {
                tracing::warn!("Generate request failed: {}", e);
                sse_event("error", json!({ "message": e.to_string() }))
            }
        };
        if let Some(event) = last {
            let _ = tx.send(event).await;
        }
    });

    let stream = ReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Ok(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
