use axum::extract::State;
use axum::Json;

use labtasker_core::models::HealthCheckResponse;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let database_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let response = if database_ok {
        HealthCheckResponse {
            status: "healthy".to_string(),
            database: "connected".to_string(),
        }
    } else {
        HealthCheckResponse {
            status: "unhealthy".to_string(),
            database: "disconnected".to_string(),
        }
    };
    Json(response)
}
