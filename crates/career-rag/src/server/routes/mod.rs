//! API routes for the chat server

pub mod chat;
pub mod collections;
pub mod generate;
pub mod ingest;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};

use crate::error::Error;
use crate::server::state::AppState;

/// Header carrying the admin API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Build all API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    let max_body_size = state.config().server.max_body_size;

    let admin = Router::new()
        .route(
            "/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route("/collections/:name", delete(collections::delete_collection))
        .route(
            "/collections/:name/documents",
            post(ingest::ingest_document).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    // Chat session (WebSocket), authenticated before the upgrade
    let chat = Router::new()
        .route("/chat/ws", get(chat::chat_ws))
        .route_layer(middleware::from_fn_with_state(state, chat::authenticate_session));

    Router::new()
        // Backend-facing streaming generation
        .route("/generate", post(generate::generate))
        // Info
        .route("/info", get(info))
        .merge(chat)
        .merge(admin)
}

/// Reject admin requests without the configured `x-api-key`
async fn require_api_key(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if let Some(expected) = state.config().admin.api_key.as_deref() {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            tracing::warn!("Rejected admin request to {}: bad or missing API key", req.uri().path());
            return Error::Unauthorized("invalid API key".to_string()).into_response();
        }
    }
    next.run(req).await
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config();
    Json(serde_json::json!({
        "name": "career-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Adaptive retrieval-augmented career guidance chat",
        "model": state.generator().model(),
        "endpoints": {
            "GET /api/chat/ws": "Chat session over WebSocket (token via Authorization header or ?token=)",
            "POST /api/generate": "Streaming generation as Server-Sent Events",
            "GET /api/collections": "List collections",
            "POST /api/collections": "Create a collection",
            "DELETE /api/collections/:name": "Delete a collection",
            "POST /api/collections/:name/documents": "Ingest a document into a collection"
        },
        "features": {
            "adaptive": config.pipeline.adaptive,
            "web_search": config.web_search.is_active(),
            "auth": config.auth.enabled,
            "default_collection": config.vector_db.default_collection,
            "max_retries": config.pipeline.max_retries
        }
    }))
}
