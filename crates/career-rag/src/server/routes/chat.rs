//! WebSocket chat endpoint
//!
//! GET /api/chat/ws?token=JWT
//!
//! The caller is authenticated before the upgrade; each socket then gets
//! its own session driven by the stream bridge. Browsers cannot set headers
//! on WebSocket requests, so the token may also come as a query parameter.

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
    Extension,
};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::bridge::Session;
use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{ServerEvent, UserIdentity};

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    /// Bearer token for clients that cannot send headers
    token: Option<String>,
}

/// Extract Bearer token from Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

/// Header token wins over the query parameter
fn session_token(headers: &HeaderMap, query: ChatQuery) -> Option<String> {
    bearer_token(headers).or(query.token)
}

/// Caller resolved by [`authenticate_session`]; `None` when anonymous
#[derive(Debug, Clone)]
pub struct SessionUser(pub Option<UserIdentity>);

/// Validate the caller's token before the upgrade is attempted
pub async fn authenticate_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response> {
    let query = Query::<ChatQuery>::try_from_uri(req.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();
    let token = session_token(req.headers(), query);

    let user = match state.authenticator().validate(token.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!("Rejected chat session: {}", e);
            return Err(e);
        }
    };
    req.extensions_mut().insert(SessionUser(user));
    Ok(next.run(req).await)
}

/// GET /api/chat/ws - Open a chat session
pub async fn chat_ws(
    State(state): State<AppState>,
    Extension(SessionUser(user)): Extension<SessionUser>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = state.bridge().open_session(user).await;

    ws.on_upgrade(move |socket| serve_socket(state, session, socket))
}

async fn serve_socket(state: AppState, session: Session, socket: WebSocket) {
    let (mut sink, stream) = socket.split();
    let (events_tx, mut events_rx) =
        mpsc::channel::<ServerEvent>(state.config().session.event_buffer.max(1));

    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Failed to encode outbound event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Text frames until the client closes or the socket errors
    let inbound = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text.to_string()),
                _ => None,
            })
        });

    state.bridge().run(session, Box::pin(inbound), events_tx).await;

    if let Err(e) = writer.await {
        tracing::error!("WebSocket writer task failed: {}", e);
    }
}
