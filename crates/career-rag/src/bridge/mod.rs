//! Stream bridge: relays one chat session to the generation orchestrator
//!
//! The reader loop validates inbound frames and queues turns; a single
//! worker task runs them one at a time, forwarding pipeline events to the
//! client as they are produced. Closing the inbound side cancels the turn in
//! flight and joins the worker before `run` returns.

mod session;

pub use session::Session;

use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::Error;
use crate::pipeline::{Orchestrator, PipelineEvent, TurnRequest};
use crate::providers::ProfileContextProvider;
use crate::types::{ClientMessage, ServerEvent, Turn, UserIdentity};

impl From<PipelineEvent> for ServerEvent {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::Token(token) => ServerEvent::Token(token),
            PipelineEvent::SourceUrl(url) => ServerEvent::SourceUrl(url),
        }
    }
}

/// Text shown to the client for a failed turn
fn client_message(error: &Error) -> String {
    match error {
        Error::Validation(message) => message.clone(),
        Error::Timeout(_) => "Response timed out, please try again".to_string(),
        _ => "Failed to generate a response, please try again".to_string(),
    }
}

#[derive(Clone)]
pub struct StreamBridge {
    orchestrator: Arc<Orchestrator>,
    profiles: Option<Arc<dyn ProfileContextProvider>>,
    turn_timeout: Duration,
    queue_depth: usize,
    event_buffer: usize,
    adaptive: bool,
}

impl StreamBridge {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: &SessionConfig) -> Self {
        Self {
            orchestrator,
            profiles: None,
            turn_timeout: settings.turn_timeout(),
            queue_depth: settings.queue_depth.max(1),
            event_buffer: settings.event_buffer.max(1),
            adaptive: true,
        }
    }

    /// Whether chat turns route, grade and verify
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileContextProvider>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Start a session for an authenticated (or anonymous) caller, attaching
    /// the caller's profile summary when one is available
    pub async fn open_session(&self, user: Option<UserIdentity>) -> Session {
        let context = match (&self.profiles, &user) {
            (Some(profiles), Some(user)) => match profiles.context_for(&user.id).await {
                Ok(context) => context,
                Err(e) => {
                    tracing::warn!("Failed to fetch profile context for user {}: {}", user.id, e);
                    None
                }
            },
            _ => None,
        };
        Session::new(user).with_user_context(context)
    }

    /// Drive a session until the inbound side ends, the client stops reading,
    /// or the session is cancelled.
    pub async fn run<S>(&self, session: Session, mut inbound: S, outbound: mpsc::Sender<ServerEvent>)
    where
        S: Stream<Item = String> + Send + Unpin,
    {
        tracing::info!(
            "Session {} opened (user: {})",
            session.id,
            session.user_id().unwrap_or("anonymous")
        );

        let cancel = session.cancellation();
        let (turns_tx, turns_rx) = mpsc::channel::<Turn>(self.queue_depth);
        let worker = TurnWorker {
            orchestrator: self.orchestrator.clone(),
            session_id: session.id.clone(),
            user_id: session.user_id().map(str::to_string),
            cancel: cancel.clone(),
            outbound: outbound.clone(),
            turn_timeout: self.turn_timeout,
            event_buffer: self.event_buffer,
            adaptive: self.adaptive,
        };
        let worker = tokio::spawn(worker.run(turns_rx));

        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = outbound.closed() => break,
                raw = inbound.next() => match raw {
                    Some(raw) => raw,
                    None => break,
                },
            };

            match ClientMessage::parse_turn(&raw) {
                Ok(turn) => {
                    let turn = turn.with_context(session.user_context().map(str::to_string));
                    tracing::debug!("Session {} queued turn for {}", session.id, turn.conversation_id);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = outbound.closed() => break,
                        sent = turns_tx.send(turn) => if sent.is_err() { break },
                    }
                }
                Err(e) => {
                    tracing::warn!("Session {} rejected message: {}", session.id, e);
                    if outbound.send(ServerEvent::Error(client_message(&e))).await.is_err() {
                        break;
                    }
                }
            }
        }

        cancel.cancel();
        drop(turns_tx);
        if let Err(e) = worker.await {
            tracing::error!("Session {} worker failed: {}", session.id, e);
        }
        tracing::info!("Session {} closed", session.id);
    }
}

/// Runs queued turns for one session, strictly one at a time
struct TurnWorker {
    orchestrator: Arc<Orchestrator>,
    session_id: String,
    user_id: Option<String>,
    cancel: CancellationToken,
    outbound: mpsc::Sender<ServerEvent>,
    turn_timeout: Duration,
    event_buffer: usize,
    adaptive: bool,
}

impl TurnWorker {
    async fn run(self, mut turns: mpsc::Receiver<Turn>) {
        loop {
            let turn = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                turn = turns.recv() => match turn {
                    Some(turn) => turn,
                    None => break,
                },
            };
            self.process(turn).await;
        }
    }

    async fn process(&self, turn: Turn) {
        let conversation_id = turn.conversation_id.clone();
        let request = TurnRequest {
            user_context: turn.context,
            conversation_id: turn.conversation_id,
            user_id: self.user_id.clone(),
            ..TurnRequest::new(turn.text).adaptive(self.adaptive)
        };

        let turn_cancel = self.cancel.child_token();
        let (events_tx, mut events_rx) = mpsc::channel::<PipelineEvent>(self.event_buffer);

        let run = async {
            tokio::select! {
                biased;
                _ = turn_cancel.cancelled() => Err(Error::Cancelled),
                result = tokio::time::timeout(
                    self.turn_timeout,
                    self.orchestrator.run(request, events_tx, turn_cancel.clone()),
                ) => result.unwrap_or(Err(Error::Timeout(self.turn_timeout))),
            }
        };

        let outbound = self.outbound.clone();
        let forward_cancel = turn_cancel.clone();
        let forward = async move {
            while let Some(event) = events_rx.recv().await {
                if outbound.send(event.into()).await.is_err() {
                    forward_cancel.cancel();
                    break;
                }
            }
        };

        let (result, ()) = tokio::join!(run, forward);
        turn_cancel.cancel();

        match result {
            Ok(outcome) => tracing::debug!(
                "Session {} finished turn {} via {} after {} regenerations",
                self.session_id,
                conversation_id,
                outcome.route,
                outcome.regenerations
            ),
            Err(e) if e.is_cancelled() => {
                tracing::info!("Session {} turn {} cancelled", self.session_id, conversation_id);
            }
            Err(e) => {
                tracing::warn!("Session {} turn {} failed: {}", self.session_id, conversation_id, e);
                let _ = self.outbound.send(ServerEvent::Error(client_message(&e))).await;
            }
        }
    }
}
