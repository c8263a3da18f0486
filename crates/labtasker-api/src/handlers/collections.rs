//! Raw collection endpoints, gated server-side by the unsafe-behavior
//! policy flag.

use axum::extract::State;
use axum::Json;

use labtasker_core::models::{QueryCollectionRequest, UpdateCollectionRequest};

use crate::auth::QueueContext;
use crate::error::HttpAppError;
use crate::state::AppState;

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn query_collection(
    ctx: QueueContext,
    State(state): State<AppState>,
    Json(request): Json<QueryCollectionRequest>,
) -> Result<Json<serde_json::Value>, HttpAppError> {
    let found = state
        .collections
        .query_collection(
            ctx.queue_id(),
            &request.collection,
            &request.query,
            request.limit,
        )
        .await?;
    Ok(Json(serde_json::json!({ "content": found })))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn update_collection(
    ctx: QueueContext,
    State(state): State<AppState>,
    Json(request): Json<UpdateCollectionRequest>,
) -> Result<Json<serde_json::Value>, HttpAppError> {
    let modified = state
        .collections
        .update_collection(
            ctx.queue_id(),
            &request.collection,
            &request.query,
            &request.update,
        )
        .await?;
    Ok(Json(serde_json::json!({ "modified": modified })))
}
