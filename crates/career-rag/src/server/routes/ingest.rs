//! Document ingestion endpoint

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{IngestRequest, IngestResponse};

/// POST /api/collections/:name/documents - Chunk, embed and store a document
pub async fn ingest_document(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>> {
    let response = state.ingestor().ingest(&collection, request).await?;
    if response.success {
        tracing::info!(
            "Document {} ingested into '{}': {} chunks",
            response.document_id,
            collection,
            response.chunks_created
        );
    } else {
        tracing::warn!("Document {} not ingested: {}", response.document_id, response.message);
    }
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use crate::config::RagConfig;
    use crate::providers::EvidenceStore;
    use crate::server::routes::api_routes;
    use crate::server::state::test_support::test_state;
    use crate::testing::ScriptedGenerator;
    use crate::types::{IngestResponse, Metadata};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn ingest(collection: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/collections/{}/documents", collection))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_reports_chunks_created() {
        let (state, store) = test_state(RagConfig::default(), Arc::new(ScriptedGenerator::new()));
        store.create_collection("academy", Metadata::new()).await.unwrap();
        let app = api_routes(state.clone()).with_state(state);

        let res = app
            .oneshot(ingest(
                "academy",
                serde_json::json!({
                    "documentId": "hust-2024",
                    "content": "Điểm chuẩn ngành CNTT tại HUST năm 2024 là 28.5 điểm.",
                    "metadata": { "source": "hust.edu.vn" }
                }),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: IngestResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(body.success);
        assert_eq!(body.document_id, "hust-2024");
        assert_eq!(body.chunks_created, 1);
    }

    #[tokio::test]
    async fn test_ingest_into_unknown_collection_is_not_found() {
        let (state, _) = test_state(RagConfig::default(), Arc::new(ScriptedGenerator::new()));
        let app = api_routes(state.clone()).with_state(state);

        let res = app
            .oneshot(ingest("missing", serde_json::json!({ "content": "Some content here." })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
