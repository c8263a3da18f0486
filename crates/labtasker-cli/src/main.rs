//! Labtasker CLI — command-line client for the coordinator API.
//!
//! Connection settings live in `$LABTASKER_ROOT/client.env`; `labtasker
//! config init` creates the file. Mutations print JSON; get/ls-shaped
//! commands print rich tables, or plain JSON through `$PAGER` with
//! `--paging`. Exit code is 0 on success, non-zero on failure.

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use labtasker_api_client::ApiClient;
use labtasker_cli::{
    client_from_config, init_tracing, parse_json_object, print_json, print_paged_or_rich,
    render_queue_details, render_task_table, render_worker_table,
};
use labtasker_client::interpolate::{interpolate, template_paths};
use labtasker_client::redact::Redactor;
use labtasker_client::{ClientConfig, JobLoop};
use labtasker_core::flatten::expand_paths;
use labtasker_core::models::{
    QueueCreateRequest, QueueUpdateRequest, TaskSubmitRequest, WorkerCreateRequest,
};
use labtasker_core::transpiler::transpile_query;

#[derive(Parser)]
#[command(name = "labtasker", about = "Task queue CLI for lab experiment workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Page plain JSON output through $PAGER instead of printing rich text
    #[arg(short, long, global = true)]
    paging: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the client configuration file
    Config {
        #[command(subcommand)]
        sub: ConfigCommands,
    },
    /// Check coordinator health
    Health,
    /// Queue operations
    Queue {
        #[command(subcommand)]
        sub: QueueCommands,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        sub: TaskCommands,
    },
    /// Worker operations
    Worker {
        #[command(subcommand)]
        sub: WorkerCommands,
    },
    /// Run a shell command for each matching task
    Loop {
        /// Command template with {{ dotted.path }} placeholders
        #[arg(long)]
        cmd: String,
        /// Filter expression (e.g. "args.foo > 0 and exists(args.bar)")
        #[arg(long)]
        extra_filter: Option<String>,
        /// Execution-time budget per task (e.g. "1h30m")
        #[arg(long)]
        eta_max: Option<String>,
        /// Reuse an existing worker id
        #[arg(long)]
        worker_id: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a fresh client configuration
    Init {
        #[arg(long, default_value = "http://localhost:8080")]
        api_base_url: String,
        #[arg(long)]
        queue_name: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "30.0")]
        heartbeat_interval: f64,
    },
    /// Print the current configuration (password masked)
    Show,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Create a new queue
    Create {
        /// Queue name (defaults to the configured one)
        #[arg(long)]
        name: Option<String>,
        /// Queue password (defaults to the configured one)
        #[arg(long)]
        password: Option<String>,
        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Show the authenticated queue
    Get,
    /// Update name, password, or metadata
    Update {
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
        /// Metadata update as a JSON object (deep-merged)
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Delete the queue
    Delete {
        /// Also delete the queue's tasks and workers
        #[arg(long)]
        cascade: bool,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Submit a task
    Submit {
        #[arg(long)]
        name: Option<String>,
        /// Task args as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
        /// Command template (stored with the task)
        #[arg(long)]
        cmd: Option<String>,
        #[arg(long)]
        heartbeat_timeout: Option<i64>,
        #[arg(long)]
        task_timeout: Option<i64>,
        #[arg(long)]
        max_retries: Option<i32>,
        /// Priority: low = 0, medium = 10, high = 20
        #[arg(long)]
        priority: Option<i32>,
    },
    /// List tasks
    Ls {
        #[arg(long, default_value = "0")]
        offset: i64,
        #[arg(long, default_value = "100")]
        limit: i64,
        #[arg(long)]
        task_id: Option<Uuid>,
        #[arg(long)]
        task_name: Option<String>,
        /// Filter expression over task fields
        #[arg(long)]
        extra_filter: Option<String>,
    },
    /// Report a task outcome: success, failed, or cancelled
    Report {
        task_id: Uuid,
        status: String,
        /// Summary as a JSON object
        #[arg(long)]
        summary: Option<String>,
    },
    /// Reset a task to pending
    Reset {
        task_id: Uuid,
        /// Field overrides as a JSON object
        #[arg(long)]
        update: Option<String>,
    },
    /// Delete a task
    Delete { task_id: Uuid },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Create a worker
    Create {
        #[arg(long)]
        name: Option<String>,
        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long)]
        max_retries: Option<i32>,
    },
    /// List workers
    Ls {
        #[arg(long, default_value = "0")]
        offset: i64,
        #[arg(long, default_value = "100")]
        limit: i64,
        #[arg(long)]
        worker_id: Option<Uuid>,
        #[arg(long)]
        worker_name: Option<String>,
    },
    /// Report a worker status: active, suspended, or failed
    Report { worker_id: Uuid, status: String },
    /// Delete a worker
    Delete {
        worker_id: Uuid,
        /// Keep task worker references instead of clearing them
        #[arg(long)]
        no_cascade: bool,
    },
}

fn load_config_and_client() -> anyhow::Result<(ClientConfig, ApiClient)> {
    let config = ClientConfig::load()
        .context("Failed to load client config; run `labtasker config init` first")?;
    let client = client_from_config(&config)?;
    Ok((config, client))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paging = cli.paging;
    match cli.command {
        Commands::Config { sub } => match sub {
            ConfigCommands::Init {
                api_base_url,
                queue_name,
                password,
                heartbeat_interval,
            } => {
                let config = ClientConfig {
                    api_base_url,
                    queue_name,
                    password,
                    heartbeat_interval,
                    cli_plugins: None,
                };
                config.validate()?;
                config.save()?;
                print_json(&serde_json::json!({ "saved": true }))?;
            }
            ConfigCommands::Show => {
                let mut config = ClientConfig::load()?;
                config.password = "*****".to_string();
                print_json(&config)?;
            }
        },
        Commands::Health => {
            let (_, client) = load_config_and_client()?;
            print_json(&client.health_check().await?)?;
        }
        Commands::Queue { sub } => {
            let (config, client) = load_config_and_client()?;
            match sub {
                QueueCommands::Create {
                    name,
                    password,
                    metadata,
                } => {
                    let request = QueueCreateRequest {
                        queue_name: name.unwrap_or(config.queue_name),
                        password: password.unwrap_or(config.password),
                        metadata: metadata
                            .as_deref()
                            .map(|m| parse_json_object(m, "metadata"))
                            .transpose()?,
                    };
                    print_json(&client.create_queue(&request).await?)?;
                }
                QueueCommands::Get => {
                    let queue = client.get_queue().await?;
                    print_paged_or_rich(&queue, render_queue_details(&queue), paging)?;
                }
                QueueCommands::Update {
                    new_name,
                    new_password,
                    metadata,
                } => {
                    let request = QueueUpdateRequest {
                        new_queue_name: new_name,
                        new_password,
                        metadata_update: metadata
                            .as_deref()
                            .map(|m| parse_json_object(m, "metadata"))
                            .transpose()?,
                    };
                    print_json(&client.update_queue(&request).await?)?;
                }
                QueueCommands::Delete { cascade } => {
                    client.delete_queue(cascade).await?;
                    print_json(&serde_json::json!({ "deleted": true }))?;
                }
            }
        }
        Commands::Task { sub } => {
            let (_, client) = load_config_and_client()?;
            match sub {
                TaskCommands::Submit {
                    name,
                    args,
                    metadata,
                    cmd,
                    heartbeat_timeout,
                    task_timeout,
                    max_retries,
                    priority,
                } => {
                    let request = TaskSubmitRequest {
                        task_name: name,
                        args: args
                            .as_deref()
                            .map(|a| parse_json_object(a, "args"))
                            .transpose()?,
                        metadata: metadata
                            .as_deref()
                            .map(|m| parse_json_object(m, "metadata"))
                            .transpose()?,
                        cmd: cmd.map(serde_json::Value::String),
                        heartbeat_timeout,
                        task_timeout,
                        max_retries,
                        priority,
                    };
                    print_json(&client.submit_task(&request).await?)?;
                }
                TaskCommands::Ls {
                    offset,
                    limit,
                    task_id,
                    task_name,
                    extra_filter,
                } => {
                    let filter = extra_filter
                        .as_deref()
                        .map(transpile_query)
                        .transpose()
                        .map_err(|e| anyhow::anyhow!("{}", e))?;
                    let response = client
                        .ls_tasks(offset, limit, task_id, task_name.as_deref(), filter.as_ref())
                        .await?;
                    print_paged_or_rich(&response, render_task_table(&response.content), paging)?;
                }
                TaskCommands::Report {
                    task_id,
                    status,
                    summary,
                } => {
                    let summary = summary
                        .as_deref()
                        .map(|s| parse_json_object(s, "summary"))
                        .transpose()?;
                    client.report_task_status(task_id, &status, summary).await?;
                    print_json(&serde_json::json!({ "status": status }))?;
                }
                TaskCommands::Reset { task_id, update } => {
                    let update = update
                        .as_deref()
                        .map(|u| parse_json_object(u, "update"))
                        .transpose()?;
                    client.reset_task(task_id, update).await?;
                    print_json(&serde_json::json!({ "status": "pending" }))?;
                }
                TaskCommands::Delete { task_id } => {
                    client.delete_task(task_id).await?;
                    print_json(&serde_json::json!({ "deleted": true }))?;
                }
            }
        }
        Commands::Worker { sub } => {
            let (_, client) = load_config_and_client()?;
            match sub {
                WorkerCommands::Create {
                    name,
                    metadata,
                    max_retries,
                } => {
                    let request = WorkerCreateRequest {
                        worker_name: name,
                        metadata: metadata
                            .as_deref()
                            .map(|m| parse_json_object(m, "metadata"))
                            .transpose()?,
                        max_retries,
                    };
                    let worker_id = client.create_worker(&request).await?;
                    print_json(&serde_json::json!({ "worker_id": worker_id }))?;
                }
                WorkerCommands::Ls {
                    offset,
                    limit,
                    worker_id,
                    worker_name,
                } => {
                    let response = client
                        .ls_workers(offset, limit, worker_id, worker_name.as_deref(), None)
                        .await?;
                    print_paged_or_rich(&response, render_worker_table(&response.content), paging)?;
                }
                WorkerCommands::Report { worker_id, status } => {
                    client.report_worker_status(worker_id, &status).await?;
                    print_json(&serde_json::json!({ "status": status }))?;
                }
                WorkerCommands::Delete {
                    worker_id,
                    no_cascade,
                } => {
                    client.delete_worker(worker_id, !no_cascade).await?;
                    print_json(&serde_json::json!({ "deleted": true }))?;
                }
            }
        }
        Commands::Loop {
            cmd,
            extra_filter,
            eta_max,
            worker_id,
        } => {
            let (config, client) = load_config_and_client()?;
            run_loop(config, client, cmd, extra_filter, eta_max, worker_id).await?;
        }
    }
    Ok(())
}

/// Drive the job loop: derive `required_fields` from the command
/// template's placeholders, then run the interpolated command per task.
async fn run_loop(
    config: ClientConfig,
    client: ApiClient,
    cmd: String,
    extra_filter: Option<String>,
    eta_max: Option<String>,
    worker_id: Option<Uuid>,
) -> anyhow::Result<()> {
    let paths = template_paths(&cmd)?;
    let required_template = expand_paths(paths.iter().map(String::as_str));

    let redactor = Redactor::new();
    redactor.register(config.password.clone());

    let mut job_loop = JobLoop::new(
        client,
        Duration::from_secs_f64(config.heartbeat_interval),
    )
    .required_fields(required_template)
    .redactor(redactor);

    if let Some(expression) = extra_filter.as_deref() {
        let filter = transpile_query(expression).map_err(|e| anyhow::anyhow!("{}", e))?;
        job_loop = job_loop.extra_filter(filter);
    }
    if let Some(eta_max) = eta_max {
        job_loop = job_loop.eta_max(eta_max);
    }
    if let Some(worker_id) = worker_id {
        job_loop = job_loop.worker_id(worker_id);
    }

    let template = cmd.clone();
    job_loop
        .run(move |ctx| {
            let template = template.clone();
            async move {
                let rendered = interpolate(&template, ctx.args())?;
                tracing::info!(task_id = %ctx.task.task_id, cmd = %rendered.rendered, "Running task command");

                let status = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&rendered.rendered)
                    .current_dir(std::env::current_dir()?)
                    .status()
                    .await
                    .context("Failed to spawn task command")?;

                if status.success() {
                    Ok(serde_json::json!({ "exit_code": 0 }))
                } else {
                    Err(anyhow::anyhow!(
                        "Command exited with status {}",
                        status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
                    ))
                }
            }
        })
        .await
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            let redactor = Redactor::new();
            eprintln!("Error: {}", redactor.redact(&format!("{err:#}")));
            std::process::ExitCode::FAILURE
        }
    }
}
