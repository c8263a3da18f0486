//! Labtasker coordinator: HTTP surface over the storage engine, plus the
//! background timeout sweeper and per-queue SSE event fan-out.

pub mod auth;
pub mod error;
pub mod events;
pub mod handlers;
pub mod state;
pub mod sweeper;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/queues", post(handlers::queues::create_queue))
        .route("/api/v1/queues/me", get(handlers::queues::get_queue))
        .route("/api/v1/queues/me", put(handlers::queues::update_queue))
        .route("/api/v1/queues/me", delete(handlers::queues::delete_queue))
        .route("/api/v1/queues/me/tasks", post(handlers::tasks::submit_task))
        .route("/api/v1/queues/me/tasks", get(handlers::tasks::list_tasks))
        .route(
            "/api/v1/queues/me/tasks/next",
            post(handlers::tasks::fetch_task),
        )
        .route(
            "/api/v1/queues/me/tasks/{task_id}/status",
            post(handlers::tasks::report_task_status),
        )
        .route(
            "/api/v1/queues/me/tasks/{task_id}/heartbeat",
            post(handlers::tasks::refresh_task_heartbeat),
        )
        .route(
            "/api/v1/queues/me/tasks/{task_id}/reset",
            post(handlers::tasks::reset_task),
        )
        .route(
            "/api/v1/queues/me/tasks/{task_id}",
            delete(handlers::tasks::delete_task),
        )
        .route(
            "/api/v1/queues/me/workers",
            post(handlers::workers::create_worker),
        )
        .route(
            "/api/v1/queues/me/workers",
            get(handlers::workers::list_workers),
        )
        .route(
            "/api/v1/queues/me/workers/{worker_id}/status",
            post(handlers::workers::report_worker_status),
        )
        .route(
            "/api/v1/queues/me/workers/{worker_id}",
            delete(handlers::workers::delete_worker),
        )
        .route(
            "/api/v1/queues/me/collections/query",
            post(handlers::collections::query_collection),
        )
        .route(
            "/api/v1/queues/me/collections/update",
            post(handlers::collections::update_collection),
        )
        .route("/api/v1/queues/me/events", get(events::subscribe_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
