use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use labtasker_core::events::{EventHub, StateTransitionEvent};
use labtasker_core::filter;
use labtasker_core::flatten::validate_user_map;
use labtasker_core::fsm::WorkerFsm;
use labtasker_core::models::{Worker, WorkerLsRequest, WorkerStatus};
use labtasker_core::ApiError;

use super::transaction::with_transaction;

pub(crate) const WORKER_COLUMNS: &str = "worker_id, queue_id, status, worker_name, metadata, \
     retries, max_retries, created_at, last_modified";

/// Drive the worker FSM for a status report and persist the outcome.
/// Shared by the worker repository and the task-failure path, which charges
/// the owning worker inside the same transaction as the task transition.
pub(crate) async fn update_worker_status_tx(
    conn: &mut PgConnection,
    queue_id: Uuid,
    worker_id: Uuid,
    report_status: &str,
) -> Result<(WorkerStatus, WorkerStatus), ApiError> {
    let worker: Option<Worker> = sqlx::query_as(&format!(
        "SELECT {WORKER_COLUMNS} FROM workers WHERE worker_id = $1 AND queue_id = $2 FOR UPDATE"
    ))
    .bind(worker_id)
    .bind(queue_id)
    .fetch_optional(&mut *conn)
    .await?;
    let worker = worker
        .ok_or_else(|| ApiError::NotFound(format!("Worker '{}' not found", worker_id)))?;

    let old_status = worker.status;
    let mut fsm = WorkerFsm::from_worker(&worker);
    match report_status {
        "active" => fsm.activate()?,
        "suspended" => fsm.suspend()?,
        "failed" => fsm.fail()?,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Invalid report_status: {}",
                other
            )))
        }
    };

    sqlx::query(
        "UPDATE workers SET status = $2, retries = $3, last_modified = $4 WHERE worker_id = $1",
    )
    .bind(worker_id)
    .bind(fsm.state)
    .bind(fsm.retries)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok((old_status, fsm.state))
}

#[derive(Clone)]
pub struct WorkerRepository {
    pool: PgPool,
    events: EventHub,
}

impl WorkerRepository {
    pub fn new(pool: PgPool, events: EventHub) -> Self {
        Self { pool, events }
    }

    #[tracing::instrument(skip(self, metadata))]
    pub async fn create_worker(
        &self,
        queue_id: Uuid,
        worker_name: Option<String>,
        metadata: Option<serde_json::Value>,
        max_retries: Option<i32>,
    ) -> Result<Uuid, ApiError> {
        let metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
        validate_user_map(&metadata, "metadata")?;
        let max_retries = max_retries.unwrap_or(3);
        if max_retries <= 0 {
            return Err(ApiError::BadRequest(
                "max_retries must be positive".to_string(),
            ));
        }

        let worker_id = Uuid::new_v4();
        let pool = self.pool.clone();
        with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO workers (worker_id, queue_id, status, worker_name, metadata,
                                         retries, max_retries, created_at, last_modified)
                    VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $7)
                    "#,
                )
                .bind(worker_id)
                .bind(queue_id)
                .bind(WorkerStatus::Active)
                .bind(&worker_name)
                .bind(&metadata)
                .bind(max_retries)
                .bind(Utc::now())
                .execute(&mut **tx)
                .await?;
                Ok(worker_id)
            })
        })
        .await
        .inspect(|worker_id| {
            tracing::info!(worker_id = %worker_id, queue_id = %queue_id, "Worker created")
        })
    }

    pub async fn get_worker(&self, queue_id: Uuid, worker_id: Uuid) -> Result<Worker, ApiError> {
        let worker: Option<Worker> = sqlx::query_as(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE worker_id = $1 AND queue_id = $2"
        ))
        .bind(worker_id)
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await?;
        worker.ok_or_else(|| ApiError::NotFound(format!("Worker '{}' not found", worker_id)))
    }

    /// List workers in submission order, with optional id/name filters and
    /// an optional filter document evaluated against each worker.
    #[tracing::instrument(skip(self, request))]
    pub async fn list_workers(
        &self,
        queue_id: Uuid,
        request: &WorkerLsRequest,
    ) -> Result<Vec<Worker>, ApiError> {
        let workers: Vec<Worker> = sqlx::query_as(&format!(
            r#"
            SELECT {WORKER_COLUMNS} FROM workers
            WHERE queue_id = $1
              AND ($2::uuid IS NULL OR worker_id = $2)
              AND ($3::text IS NULL OR worker_name = $3)
            ORDER BY created_at ASC
            "#
        ))
        .bind(queue_id)
        .bind(request.worker_id)
        .bind(&request.worker_name)
        .fetch_all(&self.pool)
        .await?;

        let mut matched = Vec::new();
        for worker in workers {
            if let Some(extra) = &request.extra_filter {
                if !filter::matches(extra, &worker.to_document())? {
                    continue;
                }
            }
            matched.push(worker);
        }

        let offset = request.offset.max(0) as usize;
        let limit = request.limit.clamp(0, 1000) as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// FSM-gated status report: active / suspended / failed. A `failed`
    /// report charges the retry budget and crashes the worker when spent.
    #[tracing::instrument(skip(self))]
    pub async fn report_worker_status(
        &self,
        queue_id: Uuid,
        worker_id: Uuid,
        report_status: &str,
    ) -> Result<WorkerStatus, ApiError> {
        let status = report_status.to_string();
        let pool = self.pool.clone();
        let (old_status, new_status) = with_transaction(&pool, false, move |tx| {
            Box::pin(
                async move { update_worker_status_tx(&mut **tx, queue_id, worker_id, &status).await },
            )
        })
        .await?;

        if old_status != new_status {
            self.events.publish(StateTransitionEvent {
                entity_type: "worker".to_string(),
                entity_id: worker_id,
                queue_id,
                old_state: old_status.to_string(),
                new_state: new_status.to_string(),
                metadata: serde_json::Value::Null,
            });
        }
        tracing::info!(worker_id = %worker_id, status = %new_status, "Worker status updated");
        Ok(new_status)
    }

    /// Delete a worker. With `cascade_update`, its tasks drop their
    /// (weak) worker reference.
    #[tracing::instrument(skip(self))]
    pub async fn delete_worker(
        &self,
        queue_id: Uuid,
        worker_id: Uuid,
        cascade_update: bool,
    ) -> Result<(), ApiError> {
        let pool = self.pool.clone();
        with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let deleted =
                    sqlx::query("DELETE FROM workers WHERE worker_id = $1 AND queue_id = $2")
                        .bind(worker_id)
                        .bind(queue_id)
                        .execute(&mut **tx)
                        .await?;
                if deleted.rows_affected() == 0 {
                    return Err(ApiError::NotFound(format!(
                        "Worker '{}' not found",
                        worker_id
                    )));
                }
                if cascade_update {
                    sqlx::query(
                        r#"
                        UPDATE tasks SET worker_id = NULL, last_modified = $3
                        WHERE queue_id = $1 AND worker_id = $2
                        "#,
                    )
                    .bind(queue_id)
                    .bind(worker_id)
                    .bind(Utc::now())
                    .execute(&mut **tx)
                    .await?;
                }
                Ok(())
            })
        })
        .await
        .inspect(|_| tracing::info!(worker_id = %worker_id, "Worker deleted"))
    }
}
