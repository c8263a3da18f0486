use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use labtasker_core::models::{
    TaskFetchRequest, TaskFetchResponse, TaskLsRequest, TaskLsResponse, TaskResetRequest,
    TaskStatusUpdateRequest, TaskSubmitRequest, TaskSubmitResponse,
};
use labtasker_core::ApiError;
use labtasker_db::FetchOptions;

use crate::auth::QueueContext;
use crate::error::HttpAppError;
use crate::state::AppState;

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn submit_task(
    ctx: QueueContext,
    State(state): State<AppState>,
    Json(request): Json<TaskSubmitRequest>,
) -> Result<(StatusCode, Json<TaskSubmitResponse>), HttpAppError> {
    let task_id = state
        .tasks
        .create_task(
            ctx.queue_id(),
            request.task_name,
            request.args,
            request.metadata,
            request.cmd,
            request.heartbeat_timeout,
            request.task_timeout,
            request.max_retries,
            request.priority,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(TaskSubmitResponse { task_id })))
}

/// Query-string form of [`TaskLsRequest`]: `extra_filter` arrives as a
/// JSON-encoded string.
#[derive(Debug, Deserialize)]
pub struct LsParams {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub extra_filter: Option<String>,
}

pub(crate) fn parse_filter_param(
    param: Option<&str>,
) -> Result<Option<serde_json::Value>, ApiError> {
    param
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| ApiError::BadRequest(format!("Invalid extra_filter: {}", e)))
        })
        .transpose()
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn list_tasks(
    ctx: QueueContext,
    State(state): State<AppState>,
    Query(params): Query<LsParams>,
) -> Result<Json<TaskLsResponse>, HttpAppError> {
    let request = TaskLsRequest {
        offset: params.offset.unwrap_or(0),
        limit: params.limit.unwrap_or(100),
        task_id: params.task_id,
        task_name: params.task_name,
        extra_filter: parse_filter_param(params.extra_filter.as_deref())?,
    };
    let content = state.tasks.list_tasks(ctx.queue_id(), &request).await?;
    Ok(Json(TaskLsResponse {
        found: !content.is_empty(),
        content,
    }))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id()))]
pub async fn fetch_task(
    ctx: QueueContext,
    State(state): State<AppState>,
    Json(request): Json<TaskFetchRequest>,
) -> Result<Json<TaskFetchResponse>, HttpAppError> {
    let options = FetchOptions {
        worker_id: request.worker_id,
        eta_max: request.eta_max,
        start_heartbeat: request.start_heartbeat,
        heartbeat_timeout: request.heartbeat_timeout,
        required_fields: request.required_fields,
        extra_filter: request.extra_filter,
    };
    let task = state.tasks.fetch_task(ctx.queue_id(), options).await?;
    Ok(Json(TaskFetchResponse {
        found: task.is_some(),
        task,
    }))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id(), task_id = %task_id))]
pub async fn report_task_status(
    ctx: QueueContext,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<TaskStatusUpdateRequest>,
) -> Result<Json<serde_json::Value>, HttpAppError> {
    let status = state
        .tasks
        .report_task_status(ctx.queue_id(), task_id, &request.status, request.summary)
        .await?;
    Ok(Json(serde_json::json!({ "status": status })))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id(), task_id = %task_id))]
pub async fn refresh_task_heartbeat(
    ctx: QueueContext,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, HttpAppError> {
    state
        .tasks
        .refresh_task_heartbeat(ctx.queue_id(), task_id)
        .await?;
    Ok(StatusCode::OK)
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id(), task_id = %task_id))]
pub async fn reset_task(
    ctx: QueueContext,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<TaskResetRequest>,
) -> Result<Json<serde_json::Value>, HttpAppError> {
    let status = state
        .tasks
        .reset_task(ctx.queue_id(), task_id, request.task_setting_update)
        .await?;
    Ok(Json(serde_json::json!({ "status": status })))
}

#[tracing::instrument(skip_all, fields(queue_id = %ctx.queue_id(), task_id = %task_id))]
pub async fn delete_task(
    ctx: QueueContext,
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, HttpAppError> {
    state.tasks.delete_task(ctx.queue_id(), task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
