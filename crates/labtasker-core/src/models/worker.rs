use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text"))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Suspended,
    Crashed,
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkerStatus::Active => write!(f, "active"),
            WorkerStatus::Suspended => write!(f, "suspended"),
            WorkerStatus::Crashed => write!(f, "crashed"),
        }
    }
}

impl FromStr for WorkerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WorkerStatus::Active),
            "suspended" => Ok(WorkerStatus::Suspended),
            "crashed" => Ok(WorkerStatus::Crashed),
            _ => Err(anyhow::anyhow!("Invalid worker status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: Uuid,
    pub queue_id: Uuid,
    pub status: WorkerStatus,
    pub worker_name: Option<String>,
    pub metadata: serde_json::Value,
    /// Consecutive task-failure count; reaching `max_retries` crashes the
    /// worker until it is manually reactivated.
    pub retries: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Worker {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Worker {
            worker_id: row.get("worker_id"),
            queue_id: row.get("queue_id"),
            status: row.get("status"),
            worker_name: row.get("worker_name"),
            metadata: row.get("metadata"),
            retries: row.get("retries"),
            max_retries: row.get("max_retries"),
            created_at: row.get("created_at"),
            last_modified: row.get("last_modified"),
        })
    }
}

impl Worker {
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in ["active", "suspended", "crashed"] {
            assert_eq!(s.parse::<WorkerStatus>().unwrap().to_string(), s);
        }
        assert!("zombie".parse::<WorkerStatus>().is_err());
    }
}
