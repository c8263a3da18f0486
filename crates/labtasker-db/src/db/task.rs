use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use labtasker_core::events::{EventHub, StateTransitionEvent};
use labtasker_core::filter;
use labtasker_core::flatten::{
    apply_flattened, flatten, get_path, reject_operator_keys, reject_protected_fields,
    validate_user_map,
};
use labtasker_core::fsm::TaskFsm;
use labtasker_core::models::{Priority, Task, TaskLsRequest, TaskStatus, WorkerStatus};
use labtasker_core::timeparse::parse_eta_max;
use labtasker_core::ApiError;

use super::transaction::with_transaction;
use super::worker::update_worker_status_tx;

pub(crate) const TASK_COLUMNS: &str = "task_id, queue_id, status, task_name, args, metadata, \
     cmd, priority, retries, max_retries, heartbeat_timeout, task_timeout, created_at, \
     start_time, last_heartbeat, last_modified, summary, worker_id";

/// Summary key written by the timeout sweeper.
const TIMEOUT_ERROR_KEY: &str = "labtasker_error";
const TIMEOUT_ERROR_MESSAGE: &str = "heartbeat or execution timed out";

/// Candidate batch size for the dispatch scan. Rejected candidates stay
/// row-locked until the fetch transaction ends, so the batch also bounds
/// how many rows a single fetch can hold locks on at once.
const FETCH_BATCH_SIZE: i64 = 100;

/// Options for [`TaskRepository::fetch_task`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub worker_id: Option<Uuid>,
    pub eta_max: Option<String>,
    pub start_heartbeat: bool,
    /// Overrides the task's stored heartbeat timeout for this execution.
    pub heartbeat_timeout: Option<i64>,
    /// Nested template; every leaf path (with `args.` prefix) must resolve
    /// to a non-null leaf in the task's args.
    pub required_fields: Option<serde_json::Value>,
    /// Backend filter document evaluated against the task document.
    pub extra_filter: Option<serde_json::Value>,
}

fn validate_cmd(cmd: &serde_json::Value) -> Result<(), ApiError> {
    match cmd {
        serde_json::Value::Null | serde_json::Value::String(_) => Ok(()),
        serde_json::Value::Array(items) if items.iter().all(|i| i.is_string()) => Ok(()),
        _ => Err(ApiError::BadRequest(
            "cmd must be a string or a list of string tokens".to_string(),
        )),
    }
}

/// Structural second pass of the dispatch filter: every leaf path in the
/// required-fields template must correspond to a non-null leaf in `args`.
/// Null template values mean "any value at this path"; non-null template
/// values are not used for matching.
fn required_fields_match(required_paths: &[String], args: &serde_json::Value) -> bool {
    required_paths
        .iter()
        .all(|path| get_path(args, path).map(|v| !v.is_null()).unwrap_or(false))
}

async fn fetch_task_for_update(
    conn: &mut PgConnection,
    queue_id: Uuid,
    task_id: Uuid,
) -> Result<Task, ApiError> {
    let task: Option<Task> = sqlx::query_as(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1 AND queue_id = $2 FOR UPDATE"
    ))
    .bind(task_id)
    .bind(queue_id)
    .fetch_optional(&mut *conn)
    .await?;
    task.ok_or_else(|| ApiError::NotFound(format!("Task '{}' not found", task_id)))
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
    events: EventHub,
}

impl TaskRepository {
    pub fn new(pool: PgPool, events: EventHub) -> Self {
        Self { pool, events }
    }

    fn publish_transition(&self, queue_id: Uuid, task_id: Uuid, old: TaskStatus, new: TaskStatus) {
        self.events.publish(StateTransitionEvent {
            entity_type: "task".to_string(),
            entity_id: task_id,
            queue_id,
            old_state: old.to_string(),
            new_state: new.to_string(),
            metadata: serde_json::Value::Null,
        });
    }

    #[tracing::instrument(skip(self, args, metadata, cmd))]
    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        queue_id: Uuid,
        task_name: Option<String>,
        args: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
        cmd: Option<serde_json::Value>,
        heartbeat_timeout: Option<i64>,
        task_timeout: Option<i64>,
        max_retries: Option<i32>,
        priority: Option<i32>,
    ) -> Result<Uuid, ApiError> {
        let args = args.unwrap_or_else(|| serde_json::json!({}));
        validate_user_map(&args, "args")?;
        let metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
        validate_user_map(&metadata, "metadata")?;
        if let Some(cmd) = &cmd {
            validate_cmd(cmd)?;
        }
        let max_retries = max_retries.unwrap_or(3);
        if max_retries <= 0 {
            return Err(ApiError::BadRequest(
                "max_retries must be positive".to_string(),
            ));
        }
        let heartbeat_timeout = heartbeat_timeout.unwrap_or(60);
        let priority = priority.unwrap_or(Priority::Medium.as_i32());

        let task_id = Uuid::new_v4();
        let pool = self.pool.clone();
        with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO tasks (task_id, queue_id, status, task_name, args, metadata, cmd,
                                       priority, retries, max_retries, heartbeat_timeout,
                                       task_timeout, created_at, start_time, last_heartbeat,
                                       last_modified, summary, worker_id)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $11, $12, NULL, NULL,
                            $12, '{}'::jsonb, NULL)
                    "#,
                )
                .bind(task_id)
                .bind(queue_id)
                .bind(TaskStatus::Pending)
                .bind(&task_name)
                .bind(&args)
                .bind(&metadata)
                .bind(&cmd)
                .bind(priority)
                .bind(max_retries)
                .bind(heartbeat_timeout)
                .bind(task_timeout)
                .bind(Utc::now())
                .execute(&mut **tx)
                .await?;
                Ok(task_id)
            })
        })
        .await
        .inspect(|task_id| {
            tracing::info!(task_id = %task_id, queue_id = %queue_id, priority, "Task submitted")
        })
    }

    pub async fn get_task(&self, queue_id: Uuid, task_id: Uuid) -> Result<Task, ApiError> {
        let task: Option<Task> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1 AND queue_id = $2"
        ))
        .bind(task_id)
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await?;
        task.ok_or_else(|| ApiError::NotFound(format!("Task '{}' not found", task_id)))
    }

    /// List tasks in submission order with optional id/name filters and an
    /// optional filter document. Pagination applies after filtering.
    #[tracing::instrument(skip(self, request))]
    pub async fn list_tasks(
        &self,
        queue_id: Uuid,
        request: &TaskLsRequest,
    ) -> Result<Vec<Task>, ApiError> {
        let tasks: Vec<Task> = sqlx::query_as(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE queue_id = $1
              AND ($2::uuid IS NULL OR task_id = $2)
              AND ($3::text IS NULL OR task_name = $3)
            ORDER BY created_at ASC
            "#
        ))
        .bind(queue_id)
        .bind(request.task_id)
        .bind(&request.task_name)
        .fetch_all(&self.pool)
        .await?;

        let mut matched = Vec::new();
        for task in tasks {
            if let Some(extra) = &request.extra_filter {
                if !filter::matches(extra, &task.to_document())? {
                    continue;
                }
            }
            matched.push(task);
        }

        let offset = request.offset.max(0) as usize;
        let limit = request.limit.clamp(0, 1000) as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// Dispatch: select one PENDING task matching the structural template
    /// and the filter document, promote it to RUNNING, and bind it to the
    /// worker. Returns None when nothing matches.
    ///
    /// Candidates are scanned in `(priority DESC, created_at ASC)` order
    /// under `FOR UPDATE SKIP LOCKED`, so concurrent fetchers race on
    /// distinct rows: whoever locks a candidate first evaluates it, and
    /// losers transparently move on to the next one.
    #[tracing::instrument(skip(self, options))]
    pub async fn fetch_task(
        &self,
        queue_id: Uuid,
        options: FetchOptions,
    ) -> Result<Option<Task>, ApiError> {
        let task_timeout = options
            .eta_max
            .as_deref()
            .map(parse_eta_max)
            .transpose()?;
        if let Some(extra) = &options.extra_filter {
            if !extra.is_object() {
                return Err(ApiError::BadRequest(
                    "extra_filter must be a JSON object".to_string(),
                ));
            }
        }
        // Lower the template to `args.`-prefixed dotted paths once.
        let required_paths: Vec<String> = match &options.required_fields {
            Some(template) => {
                validate_user_map(template, "required_fields")?;
                flatten(template, Some("args")).into_keys().collect()
            }
            None => Vec::new(),
        };

        let pool = self.pool.clone();
        let events = self.events.clone();
        let fetched = with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                if let Some(worker_id) = options.worker_id {
                    let worker: Option<(WorkerStatus,)> = sqlx::query_as(
                        "SELECT status FROM workers WHERE worker_id = $1 AND queue_id = $2",
                    )
                    .bind(worker_id)
                    .bind(queue_id)
                    .fetch_optional(&mut **tx)
                    .await?;
                    let (status,) = worker.ok_or_else(|| {
                        ApiError::NotFound(format!("Worker '{}' not found", worker_id))
                    })?;
                    if status != WorkerStatus::Active {
                        return Err(ApiError::Forbidden(format!(
                            "Worker '{}' is {}",
                            worker_id, status
                        )));
                    }
                }

                let mut offset = 0i64;
                loop {
                    let batch: Vec<Task> = sqlx::query_as(&format!(
                        r#"
                        SELECT {TASK_COLUMNS} FROM tasks
                        WHERE queue_id = $1 AND status = 'pending'
                        ORDER BY priority DESC, created_at ASC
                        LIMIT $2 OFFSET $3
                        FOR UPDATE SKIP LOCKED
                        "#
                    ))
                    .bind(queue_id)
                    .bind(FETCH_BATCH_SIZE)
                    .bind(offset)
                    .fetch_all(&mut **tx)
                    .await?;
                    let exhausted = (batch.len() as i64) < FETCH_BATCH_SIZE;

                    for task in batch {
                        if let Some(extra) = &options.extra_filter {
                            if !filter::matches(extra, &task.to_document())? {
                                continue;
                            }
                        }
                        if !required_fields_match(&required_paths, &task.to_document()) {
                            continue;
                        }

                        let now = Utc::now();
                        let updated: Task = sqlx::query_as(&format!(
                            r#"
                            UPDATE tasks
                            SET status = 'running',
                                start_time = $2,
                                last_heartbeat = $3,
                                worker_id = $4,
                                task_timeout = COALESCE($5, task_timeout),
                                heartbeat_timeout = COALESCE($6, heartbeat_timeout),
                                last_modified = $2
                            WHERE task_id = $1
                            RETURNING {TASK_COLUMNS}
                            "#
                        ))
                        .bind(task.task_id)
                        .bind(now)
                        .bind(options.start_heartbeat.then_some(now))
                        .bind(options.worker_id)
                        .bind(task_timeout)
                        .bind(options.heartbeat_timeout)
                        .fetch_one(&mut **tx)
                        .await?;
                        return Ok(Some(updated));
                    }

                    if exhausted {
                        return Ok(None);
                    }
                    offset += FETCH_BATCH_SIZE;
                }
            })
        })
        .await?;

        if let Some(task) = &fetched {
            events.publish(StateTransitionEvent {
                entity_type: "task".to_string(),
                entity_id: task.task_id,
                queue_id,
                old_state: TaskStatus::Pending.to_string(),
                new_state: TaskStatus::Running.to_string(),
                metadata: serde_json::Value::Null,
            });
            tracing::info!(task_id = %task.task_id, worker_id = ?task.worker_id, "Task dispatched");
        }
        Ok(fetched)
    }

    /// Report task execution outcome: success / failed / cancelled. A
    /// `failed` report also charges the owning worker's retry budget in
    /// the same transaction.
    #[tracing::instrument(skip(self, summary_update))]
    pub async fn report_task_status(
        &self,
        queue_id: Uuid,
        task_id: Uuid,
        report_status: &str,
        summary_update: Option<serde_json::Value>,
    ) -> Result<TaskStatus, ApiError> {
        if let Some(update) = &summary_update {
            validate_user_map(update, "summary")?;
        }
        let report = report_status.to_string();
        let pool = self.pool.clone();

        let (old_status, new_status, worker_transition) =
            with_transaction(&pool, false, move |tx| {
                Box::pin(async move {
                    let task = fetch_task_for_update(&mut **tx, queue_id, task_id).await?;
                    let old_status = task.status;

                    let mut fsm = TaskFsm::from_task(&task);
                    match report.as_str() {
                        "success" => fsm.complete()?,
                        "failed" => fsm.fail()?,
                        "cancelled" => fsm.cancel()?,
                        other => {
                            return Err(ApiError::BadRequest(format!(
                                "Invalid report_status: {}",
                                other
                            )))
                        }
                    };

                    let mut summary = task.summary.clone();
                    if let Some(update) = summary_update {
                        apply_flattened(&mut summary, &flatten(&update, None));
                    }

                    sqlx::query(
                        r#"
                        UPDATE tasks
                        SET status = $2, retries = $3, summary = $4, last_modified = $5
                        WHERE task_id = $1
                        "#,
                    )
                    .bind(task_id)
                    .bind(fsm.state)
                    .bind(fsm.retries)
                    .bind(&summary)
                    .bind(Utc::now())
                    .execute(&mut **tx)
                    .await?;

                    // Charge the worker that owned this execution.
                    let mut worker_transition = None;
                    if report == "failed" {
                        if let Some(worker_id) = task.worker_id {
                            let (w_old, w_new) =
                                update_worker_status_tx(&mut **tx, queue_id, worker_id, "failed")
                                    .await?;
                            worker_transition = Some((worker_id, w_old, w_new));
                        }
                    }

                    Ok((old_status, fsm.state, worker_transition))
                })
            })
            .await?;

        self.publish_transition(queue_id, task_id, old_status, new_status);
        if let Some((worker_id, w_old, w_new)) = worker_transition {
            if w_old != w_new {
                self.events.publish(StateTransitionEvent {
                    entity_type: "worker".to_string(),
                    entity_id: worker_id,
                    queue_id,
                    old_state: w_old.to_string(),
                    new_state: w_new.to_string(),
                    metadata: serde_json::Value::Null,
                });
            }
        }
        tracing::info!(task_id = %task_id, status = %new_status, "Task status reported");
        Ok(new_status)
    }

    /// Watchdog refresh. No FSM transition; a no-op beyond bumping
    /// `last_heartbeat`. 404 only when the task does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_task_heartbeat(
        &self,
        queue_id: Uuid,
        task_id: Uuid,
    ) -> Result<(), ApiError> {
        let updated = sqlx::query(
            "UPDATE tasks SET last_heartbeat = $3 WHERE task_id = $1 AND queue_id = $2",
        )
        .bind(task_id)
        .bind(queue_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Task '{}' not found", task_id)));
        }
        Ok(())
    }

    /// Reset a task to PENDING with a fresh retry budget, optionally
    /// applying sanitized field overrides (e.g. new args or priority).
    #[tracing::instrument(skip(self, task_setting_update))]
    pub async fn reset_task(
        &self,
        queue_id: Uuid,
        task_id: Uuid,
        task_setting_update: Option<serde_json::Value>,
    ) -> Result<TaskStatus, ApiError> {
        if let Some(update) = &task_setting_update {
            reject_protected_fields(update)?;
            reject_operator_keys(update)?;
        }
        let pool = self.pool.clone();

        let old_status = with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let task = fetch_task_for_update(&mut **tx, queue_id, task_id).await?;
                let old_status = task.status;

                // Apply overrides leaf-by-leaf onto the task document, then
                // decode it back; type mismatches surface as bad input.
                let mut doc = task.to_document();
                if let Some(update) = task_setting_update {
                    apply_flattened(&mut doc, &flatten(&update, None));
                }
                let mut updated: Task = serde_json::from_value(doc).map_err(|e| {
                    ApiError::BadRequest(format!("Invalid task setting update: {}", e))
                })?;

                let mut fsm = TaskFsm::from_task(&task);
                fsm.reset()?;
                updated.status = fsm.state;
                updated.retries = fsm.retries;

                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = $2, task_name = $3, args = $4, metadata = $5, cmd = $6,
                        priority = $7, retries = $8, max_retries = $9, heartbeat_timeout = $10,
                        task_timeout = $11, start_time = $12, last_heartbeat = $13,
                        summary = $14, worker_id = $15, last_modified = $16
                    WHERE task_id = $1
                    "#,
                )
                .bind(task_id)
                .bind(updated.status)
                .bind(&updated.task_name)
                .bind(&updated.args)
                .bind(&updated.metadata)
                .bind(&updated.cmd)
                .bind(updated.priority)
                .bind(updated.retries)
                .bind(updated.max_retries)
                .bind(updated.heartbeat_timeout)
                .bind(updated.task_timeout)
                .bind(updated.start_time)
                .bind(updated.last_heartbeat)
                .bind(&updated.summary)
                .bind(updated.worker_id)
                .bind(Utc::now())
                .execute(&mut **tx)
                .await?;
                Ok(old_status)
            })
        })
        .await?;

        self.publish_transition(queue_id, task_id, old_status, TaskStatus::Pending);
        tracing::info!(task_id = %task_id, "Task reset to pending");
        Ok(TaskStatus::Pending)
    }

    /// Cancel a task from any non-terminal-compatible state (PENDING,
    /// RUNNING, FAILED).
    #[tracing::instrument(skip(self))]
    pub async fn cancel_task(&self, queue_id: Uuid, task_id: Uuid) -> Result<TaskStatus, ApiError> {
        let pool = self.pool.clone();
        let old_status = with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let task = fetch_task_for_update(&mut **tx, queue_id, task_id).await?;
                let old_status = task.status;
                let mut fsm = TaskFsm::from_task(&task);
                fsm.cancel()?;
                sqlx::query(
                    "UPDATE tasks SET status = $2, last_modified = $3 WHERE task_id = $1",
                )
                .bind(task_id)
                .bind(fsm.state)
                .bind(Utc::now())
                .execute(&mut **tx)
                .await?;
                Ok(old_status)
            })
        })
        .await?;

        self.publish_transition(queue_id, task_id, old_status, TaskStatus::Cancelled);
        tracing::info!(task_id = %task_id, "Task cancelled");
        Ok(TaskStatus::Cancelled)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, queue_id: Uuid, task_id: Uuid) -> Result<(), ApiError> {
        let deleted = sqlx::query("DELETE FROM tasks WHERE task_id = $1 AND queue_id = $2")
            .bind(task_id)
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Task '{}' not found", task_id)));
        }
        tracing::info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    /// Timeout sweep: every RUNNING task whose heartbeat or execution
    /// watchdog expired goes through the FSM `fail()` path, and its worker
    /// is charged. Each task runs in its own transaction; one bad task
    /// never aborts the sweep of the others.
    #[tracing::instrument(skip(self))]
    pub async fn handle_timeouts(&self) -> Result<Vec<Uuid>, ApiError> {
        let candidates: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT task_id, queue_id FROM tasks
            WHERE status = 'running'
              AND (
                (last_heartbeat IS NOT NULL AND heartbeat_timeout IS NOT NULL
                 AND now() - last_heartbeat > make_interval(secs => heartbeat_timeout))
                OR
                (start_time IS NOT NULL AND task_timeout IS NOT NULL
                 AND now() - start_time > make_interval(secs => task_timeout))
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut transitioned = Vec::new();
        for (task_id, queue_id) in candidates {
            match self.timeout_one(queue_id, task_id).await {
                Ok(true) => transitioned.push(task_id),
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(task_id = %task_id, error = %err, "Timeout handling failed");
                }
            }
        }
        Ok(transitioned)
    }

    async fn timeout_one(&self, queue_id: Uuid, task_id: Uuid) -> Result<bool, ApiError> {
        let pool = self.pool.clone();
        let outcome = with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let task = fetch_task_for_update(&mut **tx, queue_id, task_id).await?;
                let now = Utc::now();
                // Re-check under the row lock: a report or heartbeat may
                // have raced ahead of the sweep.
                if task.status != TaskStatus::Running
                    || !(task.heartbeat_expired(now) || task.execution_expired(now))
                {
                    return Ok(None);
                }

                let old_status = task.status;
                let mut fsm = TaskFsm::from_task(&task);
                fsm.fail()?;

                let mut summary = task.summary.clone();
                if let serde_json::Value::Object(map) = &mut summary {
                    map.insert(
                        TIMEOUT_ERROR_KEY.to_string(),
                        serde_json::Value::String(TIMEOUT_ERROR_MESSAGE.to_string()),
                    );
                }

                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = $2, retries = $3, summary = $4, last_modified = $5
                    WHERE task_id = $1
                    "#,
                )
                .bind(task_id)
                .bind(fsm.state)
                .bind(fsm.retries)
                .bind(&summary)
                .bind(now)
                .execute(&mut **tx)
                .await?;

                let mut worker_transition = None;
                if let Some(worker_id) = task.worker_id {
                    let (w_old, w_new) =
                        update_worker_status_tx(&mut **tx, queue_id, worker_id, "failed").await?;
                    worker_transition = Some((worker_id, w_old, w_new));
                }

                Ok(Some((old_status, fsm.state, worker_transition)))
            })
        })
        .await?;

        let Some((old_status, new_status, worker_transition)) = outcome else {
            return Ok(false);
        };
        self.publish_transition(queue_id, task_id, old_status, new_status);
        if let Some((worker_id, w_old, w_new)) = worker_transition {
            if w_old != w_new {
                self.events.publish(StateTransitionEvent {
                    entity_type: "worker".to_string(),
                    entity_id: worker_id,
                    queue_id,
                    old_state: w_old.to_string(),
                    new_state: w_new.to_string(),
                    metadata: serde_json::Value::Null,
                });
            }
        }
        tracing::warn!(task_id = %task_id, status = %new_status, "Task timed out");
        Ok(true)
    }
}
