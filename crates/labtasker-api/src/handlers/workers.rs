use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use labtasker_core::models::{
    WorkerCreateRequest, WorkerCreateResponse, WorkerLsRequest, WorkerLsResponse,
    WorkerStatusUpdateRequest,
};

use crate::auth::QueueContext;
use crate::error::HttpAppError;
use crate::handlers::tasks::parse_filter_param;
use crate::state::AppState;

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn create_worker(
    ctx: QueueContext,
    State(state): State<AppState>,
    Json(request): Json<WorkerCreateRequest>,
) -> Result<(StatusCode, Json<WorkerCreateResponse>), HttpAppError> {
    let worker_id = state
        .workers
        .create_worker(
            ctx.queue_id(),
            request.worker_name,
            request.metadata,
            request.max_retries,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(WorkerCreateResponse { worker_id })))
}

#[derive(Debug, Deserialize)]
pub struct WorkerLsParams {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub worker_id: Option<Uuid>,
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub extra_filter: Option<String>,
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn list_workers(
    ctx: QueueContext,
    State(state): State<AppState>,
    Query(params): Query<WorkerLsParams>,
) -> Result<Json<WorkerLsResponse>, HttpAppError> {
    let request = WorkerLsRequest {
        offset: params.offset.unwrap_or(0),
        limit: params.limit.unwrap_or(100),
        worker_id: params.worker_id,
        worker_name: params.worker_name,
        extra_filter: parse_filter_param(params.extra_filter.as_deref())?,
    };
    let content = state.workers.list_workers(ctx.queue_id(), &request).await?;
    Ok(Json(WorkerLsResponse {
        found: !content.is_empty(),
        content,
    }))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id(), worker_id = %worker_id))]
pub async fn report_worker_status(
    ctx: QueueContext,
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Json(request): Json<WorkerStatusUpdateRequest>,
) -> Result<Json<serde_json::Value>, HttpAppError> {
    let status = state
        .workers
        .report_worker_status(ctx.queue_id(), worker_id, &request.status)
        .await?;
    Ok(Json(serde_json::json!({ "status": status })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteWorkerParams {
    #[serde(default = "default_cascade")]
    pub cascade_update: bool,
}

fn default_cascade() -> bool {
    true
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id(), worker_id = %worker_id))]
pub async fn delete_worker(
    ctx: QueueContext,
    State(state): State<AppState>,
    Path(worker_id): Path<Uuid>,
    Query(params): Query<DeleteWorkerParams>,
) -> Result<StatusCode, HttpAppError> {
    state
        .workers
        .delete_worker(ctx.queue_id(), worker_id, params.cascade_update)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
