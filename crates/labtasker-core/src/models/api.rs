//! Request/response bodies for the HTTP surface.
//!
//! These are shared between the server handlers and the API client so the
//! wire contract lives in one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Queue, Task, Worker};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCreateRequest {
    pub queue_name: String,
    pub password: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCreateResponse {
    pub queue_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueGetResponse {
    pub queue_id: Uuid,
    pub queue_name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl From<Queue> for QueueGetResponse {
    fn from(queue: Queue) -> Self {
        Self {
            queue_id: queue.queue_id,
            queue_name: queue.queue_name,
            created_at: queue.created_at,
            last_modified: queue.last_modified,
            metadata: queue.metadata,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueUpdateRequest {
    #[serde(default)]
    pub new_queue_name: Option<String>,
    #[serde(default)]
    pub new_password: Option<String>,
    #[serde(default)]
    pub metadata_update: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSubmitRequest {
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Shell command template: a string or a token list.
    #[serde(default)]
    pub cmd: Option<serde_json::Value>,
    #[serde(default)]
    pub heartbeat_timeout: Option<i64>,
    #[serde(default)]
    pub task_timeout: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmitResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFetchRequest {
    #[serde(default)]
    pub worker_id: Option<Uuid>,
    #[serde(default)]
    pub eta_max: Option<String>,
    /// When set, the fetch stamps `last_heartbeat` so the watchdog starts
    /// immediately.
    #[serde(default = "default_true")]
    pub start_heartbeat: bool,
    /// Overrides the task's stored heartbeat timeout for this execution.
    #[serde(default)]
    pub heartbeat_timeout: Option<i64>,
    /// Nested template: every leaf path must exist in `task.args`.
    #[serde(default)]
    pub required_fields: Option<serde_json::Value>,
    /// Backend filter document, AND-combined with the queue scope.
    #[serde(default)]
    pub extra_filter: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFetchResponse {
    pub found: bool,
    #[serde(default)]
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLsRequest {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub extra_filter: Option<serde_json::Value>,
}

impl Default for TaskLsRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
            task_id: None,
            task_name: None,
            extra_filter: None,
        }
    }
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskLsResponse {
    pub found: bool,
    #[serde(default)]
    pub content: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusUpdateRequest {
    /// One of: success, failed, cancelled.
    pub status: String,
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResetRequest {
    /// Sanitized field overrides applied together with the reset.
    #[serde(default)]
    pub task_setting_update: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerCreateRequest {
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCreateResponse {
    pub worker_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusUpdateRequest {
    /// One of: active, suspended, failed.
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerLsRequest {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub worker_id: Option<Uuid>,
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub extra_filter: Option<serde_json::Value>,
}

impl Default for WorkerLsRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
            worker_id: None,
            worker_name: None,
            extra_filter: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerLsResponse {
    pub found: bool,
    #[serde(default)]
    pub content: Vec<Worker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCollectionRequest {
    /// One of: queues, tasks, workers.
    pub collection: String,
    pub query: serde_json::Value,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCollectionRequest {
    pub collection: String,
    pub query: serde_json::Value,
    pub update: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_request_defaults() {
        let req: TaskFetchRequest = serde_json::from_str("{}").unwrap();
        assert!(req.start_heartbeat);
        assert!(req.worker_id.is_none());
        assert!(req.required_fields.is_none());
    }

    #[test]
    fn ls_request_defaults() {
        let req: TaskLsRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.offset, 0);
        assert_eq!(req.limit, 100);
    }
}
