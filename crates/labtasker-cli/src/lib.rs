//! Shared helpers for the labtasker CLI binary.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use labtasker_api_client::ApiClient;
use labtasker_client::ClientConfig;
use labtasker_core::models::{QueueGetResponse, Task, Worker};

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

/// Build an API client from the persisted client config.
pub fn client_from_config(config: &ClientConfig) -> Result<ApiClient> {
    ApiClient::new(
        config.api_base_url.clone(),
        config.queue_name.clone(),
        config.password.clone(),
    )
    .context("Failed to create API client")
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

/// Output for get/ls-shaped responses: with `paging`, plain JSON goes
/// through the pager; otherwise the rich table prints directly.
pub fn print_paged_or_rich(value: &impl Serialize, rich: String, paging: bool) -> Result<()> {
    if paging {
        let out = serde_json::to_string_pretty(value).context("Serialize response")?;
        echo_via_pager(&out)
    } else {
        print!("{}", rich);
        Ok(())
    }
}

/// Pipe text through `$PAGER` (default `less`). Falls back to plain
/// printing when no pager can be spawned (e.g. non-interactive runs).
pub fn echo_via_pager(text: &str) -> Result<()> {
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let mut parts = pager.split_whitespace();
    let Some(program) = parts.next() else {
        println!("{}", text);
        return Ok(());
    };

    let spawned = std::process::Command::new(program)
        .args(parts)
        .stdin(std::process::Stdio::piped())
        .spawn();
    match spawned {
        Ok(mut child) => {
            if let Some(stdin) = child.stdin.as_mut() {
                // The pager may exit before consuming everything; that is
                // not an error.
                let _ = stdin.write_all(text.as_bytes());
            }
            child.wait().context("Failed to wait for pager")?;
            Ok(())
        }
        Err(_) => {
            println!("{}", text);
            Ok(())
        }
    }
}

/// Truncate a string to max_len characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}

pub fn render_queue_details(queue: &QueueGetResponse) -> String {
    let mut out = String::new();
    out.push_str("\n=== Queue ===\n\n");
    out.push_str(&format!("{:<14} {}\n", "Queue ID:", queue.queue_id));
    out.push_str(&format!("{:<14} {}\n", "Name:", queue.queue_name));
    out.push_str(&format!(
        "{:<14} {}\n",
        "Created At:",
        queue.created_at.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "{:<14} {}\n",
        "Last Modified:",
        queue.last_modified.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "{:<14} {}\n",
        "Metadata:",
        serde_json::to_string(&queue.metadata).unwrap_or_else(|_| "{}".to_string())
    ));
    out
}

pub fn render_task_table(tasks: &[Task]) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n=== Tasks ===\n\nTotal: {} shown\n", tasks.len()));
    if tasks.is_empty() {
        out.push_str("\nNo tasks found.\n");
        return out;
    }

    out.push_str(&format!(
        "\n{:<36} {:<20} {:<10} {:>8} {:>9} {:<20} {:<20}\n",
        "ID", "Name", "Status", "Priority", "Retries", "Created At", "Worker"
    ));
    out.push_str(&format!("{}\n", "-".repeat(130)));

    for task in tasks {
        out.push_str(&format!(
            "{:<36} {:<20} {:<10} {:>8} {:>9} {:<20} {:<20}\n",
            task.task_id,
            truncate_string(task.task_name.as_deref().unwrap_or("-"), 20),
            task.status,
            task.priority,
            format!("{}/{}", task.retries, task.max_retries),
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            task.worker_id
                .map(|id| truncate_string(&id.to_string(), 20))
                .unwrap_or_else(|| "-".to_string()),
        ));
    }
    out
}

pub fn render_worker_table(workers: &[Worker]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n=== Workers ===\n\nTotal: {} shown\n",
        workers.len()
    ));
    if workers.is_empty() {
        out.push_str("\nNo workers found.\n");
        return out;
    }

    out.push_str(&format!(
        "\n{:<36} {:<20} {:<10} {:>9} {:<20}\n",
        "ID", "Name", "Status", "Retries", "Created At"
    ));
    out.push_str(&format!("{}\n", "-".repeat(100)));

    for worker in workers {
        out.push_str(&format!(
            "{:<36} {:<20} {:<10} {:>9} {:<20}\n",
            worker.worker_id,
            truncate_string(worker.worker_name.as_deref().unwrap_or("-"), 20),
            worker.status,
            format!("{}/{}", worker.retries, worker.max_retries),
            worker.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    out
}

/// Parse a CLI argument that must be a JSON object.
pub fn parse_json_object(raw: &str, what: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("{} must be valid JSON", what))?;
    if !value.is_object() {
        return Err(anyhow::anyhow!("{} must be a JSON object", what));
    }
    Ok(value)
}
