use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queue is the authentication and isolation boundary: every task and
/// worker belongs to exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub queue_id: Uuid,
    pub queue_name: String,
    /// bcrypt hash; never serialized into API responses.
    #[serde(skip_serializing)]
    pub password: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Queue {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Queue {
            queue_id: row.get("queue_id"),
            queue_name: row.get("queue_name"),
            password: row.get("password"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            last_modified: row.get("last_modified"),
        })
    }
}

/// Queue names are path- and shell-safe identifiers.
pub fn validate_queue_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_validation() {
        assert!(validate_queue_name("test_queue-1"));
        assert!(!validate_queue_name(""));
        assert!(!validate_queue_name("has space"));
        assert!(!validate_queue_name("semi;colon"));
        assert!(!validate_queue_name(&"x".repeat(101)));
    }

    #[test]
    fn password_is_never_serialized() {
        let queue = Queue {
            queue_id: Uuid::new_v4(),
            queue_name: "q".to_string(),
            password: "$2b$12$secret".to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            last_modified: Utc::now(),
        };
        let doc = serde_json::to_value(&queue).unwrap();
        assert!(doc.get("password").is_none());
    }
}
