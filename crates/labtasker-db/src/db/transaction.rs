//! Database transaction utilities.
//!
//! [`with_transaction`] begins a transaction, runs the closure, commits on
//! success and rolls back on error. A tokio task-local flag marks the
//! current task as "inside a transaction"; opening another one on the same
//! task is an error unless `allow_nesting` is set. This catches the
//! accidental nesting that would otherwise deadlock on row locks held by
//! the outer transaction.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;

use sqlx::{PgPool, Postgres, Transaction};

use labtasker_core::ApiError;

tokio::task_local! {
    static IN_TRANSACTION: Cell<bool>;
}

/// Whether the current tokio task is already inside [`with_transaction`].
pub fn in_transaction() -> bool {
    IN_TRANSACTION.try_with(|flag| flag.get()).unwrap_or(false)
}

/// Execute a closure within a database transaction.
///
/// The closure receives `&mut Transaction` and must return a boxed future
/// (lifetimes prevent a plain `async` closure here). Commit happens only
/// when the closure returns `Ok`.
pub async fn with_transaction<F, R>(pool: &PgPool, allow_nesting: bool, f: F) -> Result<R, ApiError>
where
    F: for<'a> FnOnce(
        &'a mut Transaction<'_, Postgres>,
    ) -> Pin<Box<dyn Future<Output = Result<R, ApiError>> + Send + 'a>>,
{
    if in_transaction() && !allow_nesting {
        return Err(ApiError::Internal(
            "Nested transaction: a transaction is already open on this task".to_string(),
        ));
    }

    let run = async {
        let mut tx = pool.begin().await?;
        match f(&mut tx).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(err) => {
                // Surface the original error; rollback failures only get logged.
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    };

    IN_TRANSACTION.scope(Cell::new(true), run).await
}
