//! Error types module
//!
//! All errors that cross the storage or HTTP boundary are unified under the
//! `ApiError` enum. Each variant knows its HTTP status code so the API crate
//! can render responses without re-matching on error semantics.

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidInput(format!("JSON error: {}", err))
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl ApiError {
    /// HTTP status code this error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Unauthenticated(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidInput(_) => 422,
            ApiError::InvalidStateTransition(_) => 400,
            #[cfg(feature = "sqlx")]
            ApiError::Database(_) => 500,
            ApiError::Internal(_) => 500,
        }
    }

    /// Machine-readable error type for response bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "Unauthenticated",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::InvalidInput(_) => "InvalidInput",
            ApiError::InvalidStateTransition(_) => "InvalidStateTransition",
            #[cfg(feature = "sqlx")]
            ApiError::Database(_) => "Database",
            ApiError::Internal(_) => "Internal",
        }
    }

    /// Whether the detailed message is safe to echo back to the client.
    /// Internal failures are reported generically.
    pub fn client_message(&self) -> String {
        match self {
            #[cfg(feature = "sqlx")]
            ApiError::Database(_) => "Failed to access database".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        assert_eq!(ApiError::Unauthenticated("x".into()).status_code(), 401);
        assert_eq!(ApiError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(ApiError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), 409);
        assert_eq!(ApiError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(ApiError::InvalidInput("x".into()).status_code(), 422);
        assert_eq!(
            ApiError::InvalidStateTransition("x".into()).status_code(),
            400
        );
        assert_eq!(ApiError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn internal_errors_are_not_echoed() {
        let err = ApiError::Internal("connection string leaked".into());
        assert_eq!(err.client_message(), "Internal server error");

        let err = ApiError::NotFound("Task not found".into());
        assert!(err.client_message().contains("Task not found"));
    }
}
