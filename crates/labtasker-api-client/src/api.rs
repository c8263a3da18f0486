//! Domain methods for the Labtasker API.
//!
//! Request/response types are shared with the server via
//! `labtasker_core::models`, so the wire contract lives in one place.

use anyhow::Result;
use uuid::Uuid;

use labtasker_core::models::{
    HealthCheckResponse, QueueCreateRequest, QueueCreateResponse, QueueGetResponse,
    QueueUpdateRequest, TaskFetchRequest, TaskFetchResponse, TaskLsResponse,
    TaskStatusUpdateRequest, TaskSubmitRequest, TaskSubmitResponse, WorkerCreateRequest,
    WorkerCreateResponse, WorkerLsResponse, WorkerStatusUpdateRequest,
};

use crate::ApiClient;

impl ApiClient {
    /// Check coordinator and database health. Unauthenticated.
    pub async fn health_check(&self) -> Result<HealthCheckResponse> {
        self.get("/health", &[]).await
    }

    /// Create a new queue. Unauthenticated (this is how credentials come
    /// to exist).
    pub async fn create_queue(
        &self,
        request: &QueueCreateRequest,
    ) -> Result<QueueCreateResponse> {
        self.post_json("/api/v1/queues", request).await
    }

    /// Get the authenticated queue.
    pub async fn get_queue(&self) -> Result<QueueGetResponse> {
        self.get("/api/v1/queues/me", &[]).await
    }

    /// Update the authenticated queue (rename, password change, metadata
    /// merge).
    pub async fn update_queue(&self, request: &QueueUpdateRequest) -> Result<QueueGetResponse> {
        self.put_json("/api/v1/queues/me", request).await
    }

    /// Delete the authenticated queue, optionally cascading to its tasks
    /// and workers.
    pub async fn delete_queue(&self, cascade_delete: bool) -> Result<()> {
        self.delete(
            "/api/v1/queues/me",
            &[("cascade_delete", cascade_delete.to_string())],
        )
        .await
    }

    /// Submit a task.
    pub async fn submit_task(&self, request: &TaskSubmitRequest) -> Result<TaskSubmitResponse> {
        self.post_json("/api/v1/queues/me/tasks", request).await
    }

    /// Fetch the next matching task, promoting it to RUNNING.
    pub async fn fetch_task(&self, request: &TaskFetchRequest) -> Result<TaskFetchResponse> {
        self.post_json("/api/v1/queues/me/tasks/next", request).await
    }

    /// List tasks with pagination and an optional filter document.
    pub async fn ls_tasks(
        &self,
        offset: i64,
        limit: i64,
        task_id: Option<Uuid>,
        task_name: Option<&str>,
        extra_filter: Option<&serde_json::Value>,
    ) -> Result<TaskLsResponse> {
        let mut query = vec![
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(task_id) = task_id {
            query.push(("task_id", task_id.to_string()));
        }
        if let Some(task_name) = task_name {
            query.push(("task_name", task_name.to_string()));
        }
        if let Some(filter) = extra_filter {
            query.push(("extra_filter", filter.to_string()));
        }
        self.get("/api/v1/queues/me/tasks", &query).await
    }

    /// Report a task outcome: success / failed / cancelled.
    pub async fn report_task_status(
        &self,
        task_id: Uuid,
        status: &str,
        summary: Option<serde_json::Value>,
    ) -> Result<()> {
        let request = TaskStatusUpdateRequest {
            status: status.to_string(),
            summary,
        };
        let _: serde_json::Value = self
            .post_json(
                &format!("/api/v1/queues/me/tasks/{}/status", task_id),
                &request,
            )
            .await?;
        Ok(())
    }

    /// Refresh a task's heartbeat watchdog.
    pub async fn refresh_task_heartbeat(&self, task_id: Uuid) -> Result<()> {
        self.post_empty(&format!("/api/v1/queues/me/tasks/{}/heartbeat", task_id))
            .await
    }

    /// Reset a task to PENDING, optionally overriding task settings.
    pub async fn reset_task(
        &self,
        task_id: Uuid,
        task_setting_update: Option<serde_json::Value>,
    ) -> Result<()> {
        let body = serde_json::json!({ "task_setting_update": task_setting_update });
        let _: serde_json::Value = self
            .post_json(&format!("/api/v1/queues/me/tasks/{}/reset", task_id), &body)
            .await?;
        Ok(())
    }

    /// Delete a task.
    pub async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        self.delete(&format!("/api/v1/queues/me/tasks/{}", task_id), &[])
            .await
    }

    /// Create a worker; returns its id.
    pub async fn create_worker(&self, request: &WorkerCreateRequest) -> Result<Uuid> {
        let response: WorkerCreateResponse =
            self.post_json("/api/v1/queues/me/workers", request).await?;
        Ok(response.worker_id)
    }

    /// List workers.
    pub async fn ls_workers(
        &self,
        offset: i64,
        limit: i64,
        worker_id: Option<Uuid>,
        worker_name: Option<&str>,
        extra_filter: Option<&serde_json::Value>,
    ) -> Result<WorkerLsResponse> {
        let mut query = vec![
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(worker_id) = worker_id {
            query.push(("worker_id", worker_id.to_string()));
        }
        if let Some(worker_name) = worker_name {
            query.push(("worker_name", worker_name.to_string()));
        }
        if let Some(filter) = extra_filter {
            query.push(("extra_filter", filter.to_string()));
        }
        self.get("/api/v1/queues/me/workers", &query).await
    }

    /// Report a worker status: active / suspended / failed.
    pub async fn report_worker_status(&self, worker_id: Uuid, status: &str) -> Result<()> {
        let request = WorkerStatusUpdateRequest {
            status: status.to_string(),
        };
        let _: serde_json::Value = self
            .post_json(
                &format!("/api/v1/queues/me/workers/{}/status", worker_id),
                &request,
            )
            .await?;
        Ok(())
    }

    /// Delete a worker; by default its tasks drop their worker reference.
    pub async fn delete_worker(&self, worker_id: Uuid, cascade_update: bool) -> Result<()> {
        self.delete(
            &format!("/api/v1/queues/me/workers/{}", worker_id),
            &[("cascade_update", cascade_update.to_string())],
        )
        .await
    }
}
