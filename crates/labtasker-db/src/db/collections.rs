//! Raw collection operations.
//!
//! These take caller-supplied filter/update documents and are
//! injection-prone by construction, so they sit behind the
//! `LABTASKER_ALLOW_UNSAFE_BEHAVIOR` policy flag and are intended for
//! tests. The caller's queue scope is force-injected into every query, and
//! protected fields stay off-limits even here.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use labtasker_core::filter;
use labtasker_core::flatten::{apply_flattened, flatten, reject_protected_fields};
use labtasker_core::models::{Queue, Task, Worker};
use labtasker_core::ApiError;

use super::task::TASK_COLUMNS;
use super::transaction::with_transaction;
use super::worker::WORKER_COLUMNS;

const COLLECTIONS: &[&str] = &["queues", "tasks", "workers"];

fn check_collection(name: &str) -> Result<(), ApiError> {
    if COLLECTIONS.contains(&name) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Invalid collection name '{}'. Must be one of: queues, tasks, workers",
            name
        )))
    }
}

/// Reject queries that name a different queue than the authenticated one;
/// the scope is then force-injected regardless.
fn check_queue_scope(queue_id: Uuid, query: &serde_json::Value) -> Result<(), ApiError> {
    if let Some(requested) = query.get("queue_id") {
        if requested.as_str() != Some(queue_id.to_string().as_str()) {
            return Err(ApiError::BadRequest(
                "Query queue_id does not match the authenticated queue".to_string(),
            ));
        }
    }
    Ok(())
}

/// Accept only `{"$set": {...}}`-shaped updates.
fn set_body(update: &serde_json::Value) -> Result<&serde_json::Value, ApiError> {
    let obj = update
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Update must be a JSON object".to_string()))?;
    if obj.len() != 1 || !obj.contains_key("$set") {
        return Err(ApiError::BadRequest(
            "Update must be of the form {\"$set\": {...}}".to_string(),
        ));
    }
    let body = &obj["$set"];
    if !body.is_object() {
        return Err(ApiError::BadRequest("$set body must be a map".to_string()));
    }
    reject_protected_fields(body)?;
    Ok(body)
}

#[derive(Clone)]
pub struct CollectionRepository {
    pool: PgPool,
    allow_unsafe: bool,
}

impl CollectionRepository {
    pub fn new(pool: PgPool, allow_unsafe: bool) -> Self {
        Self { pool, allow_unsafe }
    }

    fn check_enabled(&self) -> Result<(), ApiError> {
        if self.allow_unsafe {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "Raw collection operations are disabled (LABTASKER_ALLOW_UNSAFE_BEHAVIOR)"
                    .to_string(),
            ))
        }
    }

    async fn documents(
        &self,
        queue_id: Uuid,
        collection: &str,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        let docs = match collection {
            "queues" => {
                let rows: Vec<Queue> = sqlx::query_as(
                    "SELECT queue_id, queue_name, password, metadata, created_at, last_modified \
                     FROM queues WHERE queue_id = $1",
                )
                .bind(queue_id)
                .fetch_all(&self.pool)
                .await?;
                // Queue serialization masks the password hash.
                rows.iter()
                    .map(|q| serde_json::to_value(q).unwrap_or_default())
                    .collect()
            }
            "tasks" => {
                let rows: Vec<Task> = sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE queue_id = $1 ORDER BY created_at ASC"
                ))
                .bind(queue_id)
                .fetch_all(&self.pool)
                .await?;
                rows.iter().map(|t| t.to_document()).collect()
            }
            "workers" => {
                let rows: Vec<Worker> = sqlx::query_as(&format!(
                    "SELECT {WORKER_COLUMNS} FROM workers WHERE queue_id = $1 ORDER BY created_at ASC"
                ))
                .bind(queue_id)
                .fetch_all(&self.pool)
                .await?;
                rows.iter().map(|w| w.to_document()).collect()
            }
            _ => unreachable!("collection validated"),
        };
        Ok(docs)
    }

    /// Evaluate a raw filter document over a collection, scoped to the
    /// authenticated queue.
    #[tracing::instrument(skip(self, query))]
    pub async fn query_collection(
        &self,
        queue_id: Uuid,
        collection: &str,
        query: &serde_json::Value,
        limit: i64,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        self.check_enabled()?;
        check_collection(collection)?;
        check_queue_scope(queue_id, query)?;

        let scoped = filter::scope_to_queue(&queue_id.to_string(), query.clone());
        let mut out = Vec::new();
        for doc in self.documents(queue_id, collection).await? {
            if filter::matches(&scoped, &doc)? {
                out.push(doc);
                if out.len() as i64 >= limit.max(0) {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Apply a `{"$set": {...}}` update to every matching document in a
    /// collection. Returns whether anything was modified.
    #[tracing::instrument(skip(self, query, update))]
    pub async fn update_collection(
        &self,
        queue_id: Uuid,
        collection: &str,
        query: &serde_json::Value,
        update: &serde_json::Value,
    ) -> Result<bool, ApiError> {
        self.check_enabled()?;
        check_collection(collection)?;
        check_queue_scope(queue_id, query)?;
        let updates = flatten(set_body(update)?, None);

        let scoped = filter::scope_to_queue(&queue_id.to_string(), query.clone());
        let collection = collection.to_string();
        let pool = self.pool.clone();

        with_transaction(&pool, false, move |tx| {
            Box::pin(async move {
                let mut modified = false;
                match collection.as_str() {
                    "tasks" => {
                        let rows: Vec<Task> = sqlx::query_as(&format!(
                            "SELECT {TASK_COLUMNS} FROM tasks WHERE queue_id = $1 FOR UPDATE"
                        ))
                        .bind(queue_id)
                        .fetch_all(&mut **tx)
                        .await?;
                        for task in rows {
                            let mut doc = task.to_document();
                            if !filter::matches(&scoped, &doc)? {
                                continue;
                            }
                            apply_flattened(&mut doc, &updates);
                            let updated: Task = serde_json::from_value(doc).map_err(|e| {
                                ApiError::BadRequest(format!("Invalid update: {}", e))
                            })?;
                            sqlx::query(
                                r#"
                                UPDATE tasks
                                SET status = $2, task_name = $3, args = $4, metadata = $5,
                                    cmd = $6, priority = $7, retries = $8, max_retries = $9,
                                    heartbeat_timeout = $10, task_timeout = $11, start_time = $12,
                                    last_heartbeat = $13, summary = $14, worker_id = $15,
                                    last_modified = $16
                                WHERE task_id = $1
                                "#,
                            )
                            .bind(task.task_id)
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
                            modified = true;
                        }
                    }
                    "workers" => {
                        let rows: Vec<Worker> = sqlx::query_as(&format!(
                            "SELECT {WORKER_COLUMNS} FROM workers WHERE queue_id = $1 FOR UPDATE"
                        ))
                        .bind(queue_id)
                        .fetch_all(&mut **tx)
                        .await?;
                        for worker in rows {
                            let mut doc = worker.to_document();
                            if !filter::matches(&scoped, &doc)? {
                                continue;
                            }
                            apply_flattened(&mut doc, &updates);
                            let updated: Worker = serde_json::from_value(doc).map_err(|e| {
                                ApiError::BadRequest(format!("Invalid update: {}", e))
                            })?;
                            sqlx::query(
                                r#"
                                UPDATE workers
                                SET status = $2, worker_name = $3, metadata = $4, retries = $5,
                                    max_retries = $6, last_modified = $7
                                WHERE worker_id = $1
                                "#,
                            )
                            .bind(worker.worker_id)
                            .bind(updated.status)
                            .bind(&updated.worker_name)
                            .bind(&updated.metadata)
                            .bind(updated.retries)
                            .bind(updated.max_retries)
                            .bind(Utc::now())
                            .execute(&mut **tx)
                            .await?;
                            modified = true;
                        }
                    }
                    "queues" => {
                        let rows: Vec<Queue> = sqlx::query_as(
                            "SELECT queue_id, queue_name, password, metadata, created_at, \
                             last_modified FROM queues WHERE queue_id = $1 FOR UPDATE",
                        )
                        .bind(queue_id)
                        .fetch_all(&mut **tx)
                        .await?;
                        for queue in rows {
                            // The password hash is not serialized, so raw
                            // updates cannot read or alter it.
                            let mut doc = serde_json::to_value(&queue).unwrap_or_default();
                            if !filter::matches(&scoped, &doc)? {
                                continue;
                            }
                            apply_flattened(&mut doc, &updates);
                            let queue_name = doc
                                .get("queue_name")
                                .and_then(|v| v.as_str())
                                .unwrap_or(&queue.queue_name)
                                .to_string();
                            let metadata = doc
                                .get("metadata")
                                .cloned()
                                .unwrap_or_else(|| serde_json::json!({}));
                            sqlx::query(
                                "UPDATE queues SET queue_name = $2, metadata = $3, \
                                 last_modified = $4 WHERE queue_id = $1",
                            )
                            .bind(queue.queue_id)
                            .bind(&queue_name)
                            .bind(&metadata)
                            .bind(Utc::now())
                            .execute(&mut **tx)
                            .await?;
                            modified = true;
                        }
                    }
                    _ => unreachable!("collection validated"),
                }
                Ok(modified)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_names_validated() {
        assert!(check_collection("tasks").is_ok());
        assert!(check_collection("queues").is_ok());
        assert!(check_collection("workers").is_ok());
        assert!(check_collection("secrets").is_err());
    }

    #[test]
    fn foreign_queue_scope_rejected() {
        let queue_id = Uuid::new_v4();
        assert!(check_queue_scope(queue_id, &json!({})).is_ok());
        assert!(check_queue_scope(queue_id, &json!({"queue_id": queue_id.to_string()})).is_ok());
        assert!(check_queue_scope(queue_id, &json!({"queue_id": "someone-else"})).is_err());
    }

    #[test]
    fn only_set_updates_accepted() {
        assert!(set_body(&json!({"$set": {"metadata.tag": 1}})).is_ok());
        assert!(set_body(&json!({"$unset": {"metadata.tag": 1}})).is_err());
        assert!(set_body(&json!({"metadata.tag": 1})).is_err());
        assert!(set_body(&json!({"$set": {"queue_id": "x"}})).is_err());
        assert!(set_body(&json!({"$set": {"created_at": "x"}})).is_err());
    }
}
