use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use labtasker_core::models::{
    QueueCreateRequest, QueueCreateResponse, QueueGetResponse, QueueUpdateRequest,
};

use crate::auth::QueueContext;
use crate::error::HttpAppError;
use crate::state::AppState;

/// Queue creation is the only unauthenticated mutation: it is how a queue
/// comes to exist in the first place.
#[tracing::instrument(skip(state, request))]
pub async fn create_queue(
    State(state): State<AppState>,
    Json(request): Json<QueueCreateRequest>,
) -> Result<(StatusCode, Json<QueueCreateResponse>), HttpAppError> {
    let queue_id = state
        .queues
        .create_queue(&request.queue_name, &request.password, request.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(QueueCreateResponse { queue_id })))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn get_queue(ctx: QueueContext) -> Json<QueueGetResponse> {
    Json(QueueGetResponse::from(ctx.queue))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn update_queue(
    ctx: QueueContext,
    State(state): State<AppState>,
    Json(request): Json<QueueUpdateRequest>,
) -> Result<Json<QueueGetResponse>, HttpAppError> {
    state
        .queues
        .update_queue(
            ctx.queue_id(),
            request.new_queue_name,
            request.new_password,
            request.metadata_update,
        )
        .await?;
    let queue = state.queues.get_queue_by_id(ctx.queue_id()).await?;
    Ok(Json(QueueGetResponse::from(queue)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQueueParams {
    #[serde(default)]
    pub cascade_delete: bool,
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn delete_queue(
    ctx: QueueContext,
    State(state): State<AppState>,
    Query(params): Query<DeleteQueueParams>,
) -> Result<StatusCode, HttpAppError> {
    state
        .queues
        .delete_queue(ctx.queue_id(), params.cascade_delete)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
