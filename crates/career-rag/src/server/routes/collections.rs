//! Collection lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{metadata_from_json, CollectionInfo, CreateCollectionRequest};

/// POST /api/collections - Create a named collection
pub async fn create_collection(
    State(state): State<AppState>,
    Json(request): Json<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<CollectionInfo>)> {
    let metadata = metadata_from_json(request.metadata)?;
    let info = state.store().create_collection(&request.name, metadata).await?;
    tracing::info!("Created collection '{}'", info.name);
    Ok((StatusCode::CREATED, Json(info)))
}

/// GET /api/collections - List collections
pub async fn list_collections(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let collections = state.store().list_collections().await?;
    Ok(Json(json!({
        "collections": collections,
        "total": collections.len(),
    })))
}

/// DELETE /api/collections/:name - Delete a collection and its chunks
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    if !state.store().delete_collection(&name).await? {
        return Err(Error::CollectionNotFound(name));
    }
    tracing::info!("Deleted collection '{}'", name);
    Ok(Json(json!({ "deleted": name })))
}
