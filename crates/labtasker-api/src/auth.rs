//! HTTP Basic authentication against queue credentials.
//!
//! The username is either the queue name or the queue id (the id form is
//! what lets a client rename its queue). The resolved queue document is
//! handed to handlers as the `QueueContext` extractor.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;

use labtasker_core::models::Queue;
use labtasker_core::ApiError;

use crate::error::HttpAppError;
use crate::state::AppState;

/// The authenticated queue for the current request.
#[derive(Debug, Clone)]
pub struct QueueContext {
    pub queue: Queue,
}

impl QueueContext {
    pub fn queue_id(&self) -> Uuid {
        self.queue.queue_id
    }
}

fn parse_basic_auth(header: &str) -> Result<(String, String), ApiError> {
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| ApiError::Unauthenticated("Expected Basic authentication".to_string()))?;
    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|_| ApiError::Unauthenticated("Invalid Basic credentials".to_string()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ApiError::Unauthenticated("Invalid Basic credentials".to_string()))?;
    let (user, password) = decoded
        .split_once(':')
        .ok_or_else(|| ApiError::Unauthenticated("Invalid Basic credentials".to_string()))?;
    Ok((user.to_string(), password.to_string()))
}

impl FromRequestParts<AppState> for QueueContext {
    type Rejection = HttpAppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                HttpAppError(ApiError::Unauthenticated(
                    "Missing authorization header".to_string(),
                ))
            })?;

        let (user, password) = parse_basic_auth(header)?;

        // The username is a queue id when it parses as a UUID, a queue
        // name otherwise. Lookup failures are reported as 401, not 404,
        // so the endpoint does not leak which queues exist.
        let lookup = match user.parse::<Uuid>() {
            Ok(queue_id) => state.queues.get_queue_by_id(queue_id).await,
            Err(_) => state.queues.get_queue_by_name(&user).await,
        };
        let queue = lookup.map_err(|_| {
            HttpAppError(ApiError::Unauthenticated("Queue not found".to_string()))
        })?;

        if !state
            .queues
            .security()
            .verify_password(&password, &queue.password)
        {
            return Err(HttpAppError(ApiError::Unauthenticated(
                "Invalid password".to_string(),
            )));
        }

        Ok(QueueContext { queue })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header_parsing() {
        let header = format!("Basic {}", BASE64.encode("test_queue:test_password"));
        let (user, password) = parse_basic_auth(&header).unwrap();
        assert_eq!(user, "test_queue");
        assert_eq!(password, "test_password");
    }

    #[test]
    fn passwords_may_contain_colons() {
        let header = format!("Basic {}", BASE64.encode("q:pa:ss"));
        let (user, password) = parse_basic_auth(&header).unwrap();
        assert_eq!(user, "q");
        assert_eq!(password, "pa:ss");
    }

    #[test]
    fn malformed_headers_rejected() {
        assert!(parse_basic_auth("Bearer token").is_err());
        assert!(parse_basic_auth("Basic not-base64!!!").is_err());
        let no_colon = format!("Basic {}", BASE64.encode("just-a-user"));
        assert!(parse_basic_auth(&no_colon).is_err());
    }
}
