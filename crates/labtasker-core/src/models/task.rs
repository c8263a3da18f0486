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
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// Named priority levels. Tasks store a raw i32 so callers can submit
/// arbitrary priorities; these are the conventional anchors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Medium = 10,
    High = 20,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority as i32
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(anyhow::anyhow!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub queue_id: Uuid,
    pub status: TaskStatus,
    pub task_name: Option<String>,
    /// Arbitrary nested map of experiment parameters.
    pub args: serde_json::Value,
    pub metadata: serde_json::Value,
    /// Shell command template: a string or a token list.
    pub cmd: Option<serde_json::Value>,
    pub priority: i32,
    pub retries: i32,
    pub max_retries: i32,
    pub heartbeat_timeout: Option<i64>,
    pub task_timeout: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    pub summary: serde_json::Value,
    pub worker_id: Option<Uuid>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            task_id: row.get("task_id"),
            queue_id: row.get("queue_id"),
            status: row.get("status"),
            task_name: row.get("task_name"),
            args: row.get("args"),
            metadata: row.get("metadata"),
            cmd: row.get("cmd"),
            priority: row.get("priority"),
            retries: row.get("retries"),
            max_retries: row.get("max_retries"),
            heartbeat_timeout: row.get("heartbeat_timeout"),
            task_timeout: row.get("task_timeout"),
            created_at: row.get("created_at"),
            start_time: row.get("start_time"),
            last_heartbeat: row.get("last_heartbeat"),
            last_modified: row.get("last_modified"),
            summary: row.get("summary"),
            worker_id: row.get("worker_id"),
        })
    }
}

impl Task {
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Render the task as a JSON document for filter evaluation. Field
    /// names match the wire representation, so filters written against
    /// the API (`args.foo`, `priority`, ...) apply directly.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Heartbeat watchdog: expired when a heartbeat was recorded and the
    /// configured timeout has elapsed since.
    pub fn heartbeat_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.last_heartbeat, self.heartbeat_timeout) {
            (Some(last), Some(timeout)) => (now - last).num_seconds() > timeout,
            _ => false,
        }
    }

    /// Execution watchdog: expired when the task has started and ran past
    /// its `task_timeout`.
    pub fn execution_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.start_time, self.task_timeout) {
            (Some(start), Some(timeout)) => (now - start).num_seconds() > timeout,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_task() -> Task {
        Task {
            task_id: Uuid::new_v4(),
            queue_id: Uuid::new_v4(),
            status: TaskStatus::Running,
            task_name: Some("train".to_string()),
            args: json!({"lr": 0.1}),
            metadata: json!({}),
            cmd: None,
            priority: Priority::Medium.as_i32(),
            retries: 0,
            max_retries: 3,
            heartbeat_timeout: Some(60),
            task_timeout: None,
            created_at: Utc::now(),
            start_time: Some(Utc::now()),
            last_heartbeat: Some(Utc::now()),
            last_modified: Utc::now(),
            summary: json!({}),
            worker_id: None,
        }
    }

    #[test]
    fn status_round_trip() {
        for s in ["pending", "running", "success", "failed", "cancelled"] {
            assert_eq!(s.parse::<TaskStatus>().unwrap().to_string(), s);
        }
        assert!("invalid".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn priority_anchors() {
        assert_eq!(Priority::Low.as_i32(), 0);
        assert_eq!(Priority::Medium.as_i32(), 10);
        assert_eq!(Priority::High.as_i32(), 20);
        assert_eq!(Priority::default(), Priority::Medium);
        assert!(Priority::Low < Priority::High);
    }

    #[test]
    fn heartbeat_expiry_respects_timeout() {
        let mut task = sample_task();
        let now = Utc::now();
        task.last_heartbeat = Some(now - Duration::seconds(120));
        task.heartbeat_timeout = Some(60);
        assert!(task.heartbeat_expired(now));

        task.last_heartbeat = Some(now - Duration::seconds(30));
        assert!(!task.heartbeat_expired(now));

        task.last_heartbeat = None;
        assert!(!task.heartbeat_expired(now));
    }

    #[test]
    fn execution_expiry_requires_task_timeout() {
        let mut task = sample_task();
        let now = Utc::now();
        task.start_time = Some(now - Duration::seconds(1000));
        task.task_timeout = None;
        assert!(!task.execution_expired(now));

        task.task_timeout = Some(500);
        assert!(task.execution_expired(now));
    }

    #[test]
    fn document_exposes_wire_field_names() {
        let task = sample_task();
        let doc = task.to_document();
        assert_eq!(doc["status"], json!("running"));
        assert_eq!(doc["args"]["lr"], json!(0.1));
        assert_eq!(doc["priority"], json!(10));
    }
}
