use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use labtasker_core::flatten::{flatten, validate_user_map};
use labtasker_core::models::queue::validate_queue_name;
use labtasker_core::models::Queue;
use labtasker_core::security::SecurityManager;
use labtasker_core::ApiError;

use super::transaction::with_transaction;

const QUEUE_COLUMNS: &str =
    "queue_id, queue_name, password, metadata, created_at, last_modified";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct QueueRepository {
    pool: PgPool,
    security: SecurityManager,
}

impl QueueRepository {
    pub fn new(pool: PgPool, security: SecurityManager) -> Self {
        Self { pool, security }
    }

    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    #[tracing::instrument(skip(self, password, metadata))]
    pub async fn create_queue(
        &self,
        queue_name: &str,
        password: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid, ApiError> {
        if !validate_queue_name(queue_name) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid queue name: {:?}",
                queue_name
            )));
        }
        let metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
        validate_user_map(&metadata, "metadata")?;
        let hashed = self.security.hash_password(password)?;

        let queue_id = Uuid::new_v4();
        let queue_name = queue_name.to_string();
        let pool = self.pool.clone();

        with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let now = Utc::now();
                sqlx::query(
                    r#"
                    INSERT INTO queues (queue_id, queue_name, password, metadata, created_at, last_modified)
                    VALUES ($1, $2, $3, $4, $5, $5)
                    "#,
                )
                .bind(queue_id)
                .bind(&queue_name)
                .bind(&hashed)
                .bind(&metadata)
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::Conflict(format!("Queue '{}' already exists", queue_name))
                    } else {
                        ApiError::Database(e)
                    }
                })?;
                Ok(queue_id)
            })
        })
        .await
        .inspect(|queue_id| tracing::info!(queue_id = %queue_id, "Queue created"))
    }

    pub async fn get_queue_by_name(&self, queue_name: &str) -> Result<Queue, ApiError> {
        let queue: Option<Queue> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues WHERE queue_name = $1"
        ))
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await?;

        queue.ok_or_else(|| ApiError::NotFound(format!("Queue '{}' not found", queue_name)))
    }

    pub async fn get_queue_by_id(&self, queue_id: Uuid) -> Result<Queue, ApiError> {
        let queue: Option<Queue> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues WHERE queue_id = $1"
        ))
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await?;

        queue.ok_or_else(|| ApiError::NotFound(format!("Queue '{}' not found", queue_id)))
    }

    /// Get a queue by id and/or name. When both are supplied they must
    /// refer to the same queue.
    pub async fn get_queue(
        &self,
        queue_id: Option<Uuid>,
        queue_name: Option<&str>,
    ) -> Result<Queue, ApiError> {
        let queue = match (queue_id, queue_name) {
            (Some(id), _) => self.get_queue_by_id(id).await?,
            (None, Some(name)) => self.get_queue_by_name(name).await?,
            (None, None) => {
                return Err(ApiError::BadRequest(
                    "Either queue_id or queue_name must be provided".to_string(),
                ))
            }
        };
        if let Some(name) = queue_name {
            if queue.queue_name != name {
                return Err(ApiError::BadRequest(format!(
                    "queue_id and queue_name disagree: '{}' vs '{}'",
                    queue.queue_name, name
                )));
            }
        }
        Ok(queue)
    }

    #[tracing::instrument(skip(self, new_password, metadata_update))]
    pub async fn update_queue(
        &self,
        queue_id: Uuid,
        new_queue_name: Option<String>,
        new_password: Option<String>,
        metadata_update: Option<serde_json::Value>,
    ) -> Result<(), ApiError> {
        if let Some(name) = &new_queue_name {
            if !validate_queue_name(name) {
                return Err(ApiError::InvalidInput(format!(
                    "Invalid queue name: {:?}",
                    name
                )));
            }
        }
        let new_password = new_password
            .map(|pw| self.security.hash_password(&pw))
            .transpose()?;
        if let Some(update) = &metadata_update {
            validate_user_map(update, "metadata")?;
        }

        let pool = self.pool.clone();
        with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let queue: Option<Queue> = sqlx::query_as(&format!(
                    "SELECT {QUEUE_COLUMNS} FROM queues WHERE queue_id = $1 FOR UPDATE"
                ))
                .bind(queue_id)
                .fetch_optional(&mut **tx)
                .await?;
                let mut queue = queue
                    .ok_or_else(|| ApiError::NotFound(format!("Queue '{}' not found", queue_id)))?;

                if let Some(name) = &new_queue_name {
                    if *name != queue.queue_name {
                        let taken: Option<(Uuid,)> =
                            sqlx::query_as("SELECT queue_id FROM queues WHERE queue_name = $1")
                                .bind(name)
                                .fetch_optional(&mut **tx)
                                .await?;
                        if taken.is_some() {
                            return Err(ApiError::Conflict(format!(
                                "Queue name '{}' already exists",
                                name
                            )));
                        }
                        queue.queue_name = name.clone();
                    }
                }
                if let Some(hashed) = new_password {
                    queue.password = hashed;
                }
                if let Some(update) = metadata_update {
                    // Leaf-by-leaf merge: sibling keys survive the update.
                    let updates = flatten(&update, None);
                    labtasker_core::flatten::apply_flattened(&mut queue.metadata, &updates);
                }

                sqlx::query(
                    r#"
                    UPDATE queues
                    SET queue_name = $2, password = $3, metadata = $4, last_modified = $5
                    WHERE queue_id = $1
                    "#,
                )
                .bind(queue_id)
                .bind(&queue.queue_name)
                .bind(&queue.password)
                .bind(&queue.metadata)
                .bind(Utc::now())
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
        })
        .await
        .inspect(|_| tracing::info!(queue_id = %queue_id, "Queue updated"))
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_queue(&self, queue_id: Uuid, cascade_delete: bool) -> Result<(), ApiError> {
        let pool = self.pool.clone();
        with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let deleted = sqlx::query("DELETE FROM queues WHERE queue_id = $1")
                    .bind(queue_id)
                    .execute(&mut **tx)
                    .await?;
                if deleted.rows_affected() == 0 {
                    return Err(ApiError::NotFound(format!("Queue '{}' not found", queue_id)));
                }
                if cascade_delete {
                    sqlx::query("DELETE FROM tasks WHERE queue_id = $1")
                        .bind(queue_id)
                        .execute(&mut **tx)
                        .await?;
                    sqlx::query("DELETE FROM workers WHERE queue_id = $1")
                        .bind(queue_id)
                        .execute(&mut **tx)
                        .await?;
                }
                Ok(())
            })
        })
        .await
        .inspect(|_| {
            tracing::info!(queue_id = %queue_id, cascade = cascade_delete, "Queue deleted")
        })
    }
}
