//! The client job loop: fetch → run → heartbeat → report.
//!
//! The user function is registered together with its declared arguments
//! ([`Required`] descriptors with optional alias and resolver). Each loop
//! iteration fetches one matching task, starts the heartbeat sender,
//! resolves the declared arguments from the task's args, and runs the
//! function to completion inline. Failures (errors and panics) are
//! captured and reported as `failed` with a structured summary; a normal
//! return reports `success` unless the function already called
//! [`JobContext::finish`]. Errors outside the user function go to an
//! installable loop-error handler and the loop keeps going.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use serde_json::Value;
use uuid::Uuid;

use labtasker_api_client::ApiClient;
use labtasker_core::flatten::{expand_paths, get_path, set_path};
use labtasker_core::models::{Task, TaskFetchRequest, WorkerCreateRequest};

use crate::heartbeat::HeartbeatHandle;
use crate::paths::{log_root, RunPaths};
use crate::redact::Redactor;

/// Resolver applied to a fetched argument value before it reaches the user
/// function.
pub type ArgResolver = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A declared parameter of the user function. The task must carry a
/// non-null value at the parameter's path (or its alias) in `args`.
#[derive(Clone)]
pub struct Required {
    name: String,
    alias: Option<String>,
    resolver: Option<ArgResolver>,
}

impl Required {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            resolver: None,
        }
    }

    /// Resolve from a different path in `task.args` than the parameter
    /// name.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Pure transform applied to the fetched value.
    pub fn resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    fn path(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Union the declared parameter paths into the caller's required-fields
/// template. Existing template entries win; new paths get null leaves
/// ("any value at this path").
fn union_required_template(template: Option<Value>, params: &[Required]) -> Option<Value> {
    let extra: Vec<&str> = params.iter().map(|p| p.path()).collect();
    if extra.is_empty() {
        return template;
    }
    let mut merged = template.unwrap_or_else(|| expand_paths(Vec::<String>::new()));
    for path in extra {
        if get_path(&merged, path).is_none() {
            set_path(&mut merged, path, Value::Null);
        }
    }
    Some(merged)
}

/// Resolve every declared parameter from the task's args, then overlay the
/// caller-supplied values. A name that is both declared and supplied is a
/// conflict.
fn resolve_arguments(
    params: &[Required],
    overrides: &BTreeMap<String, Value>,
    args: &Value,
) -> Result<BTreeMap<String, Value>> {
    let mut resolved = BTreeMap::new();
    for param in params {
        if overrides.contains_key(&param.name) {
            return Err(anyhow::anyhow!(
                "Argument '{}' is declared Required and must be left for the runner to fill, \
                 but a value was supplied directly",
                param.name
            ));
        }
        let value = get_path(args, param.path())
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Required field '{}' is not found in task args",
                    param.path()
                )
            })?;
        let value = match &param.resolver {
            Some(resolver) => resolver(value).with_context(|| {
                format!("Failed to resolve field '{}' with its resolver", param.name)
            })?,
            None => value,
        };
        resolved.insert(param.name.clone(), value);
    }
    for (name, value) in overrides {
        resolved.insert(name.clone(), value.clone());
    }
    Ok(resolved)
}

/// Write `summary.json` (the idempotence sentinel) and `status.json`.
/// Returns false when the sentinel already exists, meaning a finish for
/// this run already happened (possibly from a subprocess wrapper).
fn write_finish_artifacts(run_paths: &RunPaths, status: &str, summary: &Value) -> Result<bool> {
    use std::io::Write;

    let file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(run_paths.summary_file())
    {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("Failed to create {}", run_paths.summary_file().display())
            })
        }
    };
    let mut file = file;
    file.write_all(serde_json::to_string_pretty(summary)?.as_bytes())
        .context("Failed to write summary.json")?;

    std::fs::write(
        run_paths.status_file(),
        serde_json::to_string_pretty(&serde_json::json!({ "status": status }))?,
    )
    .context("Failed to write status.json")?;
    Ok(true)
}

/// Everything the user function gets about the current task.
#[derive(Clone)]
pub struct JobContext {
    pub task: Task,
    pub worker_id: Uuid,
    resolved: Arc<BTreeMap<String, Value>>,
    run_paths: RunPaths,
    client: ApiClient,
    finished: Arc<AtomicBool>,
}

impl JobContext {
    /// A resolved declared argument by parameter name.
    pub fn arg(&self, name: &str) -> Result<&Value> {
        self.resolved
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("No resolved argument named '{}'", name))
    }

    pub fn args(&self) -> &Value {
        &self.task.args
    }

    pub fn run_dir(&self) -> &Path {
        self.run_paths.dir()
    }

    /// Report the task outcome exactly once. Later calls within the same
    /// task run are no-ops, so subprocess wrappers may call this without
    /// risking a double report.
    pub async fn finish(&self, status: &str, summary: Value) -> Result<()> {
        if !matches!(status, "success" | "failed" | "cancelled") {
            return Err(anyhow::anyhow!("Invalid finish status: {}", status));
        }
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !write_finish_artifacts(&self.run_paths, status, &summary)? {
            return Ok(());
        }
        self.run_paths
            .log_line(&format!("task finished with status {}", status));
        self.client
            .report_task_status(self.task.task_id, status, Some(summary))
            .await
    }
}

type LoopErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Builder/driver for the job loop.
pub struct JobLoop {
    client: ApiClient,
    heartbeat_interval: Duration,
    heartbeat_timeout: Option<i64>,
    required_fields: Option<Value>,
    extra_filter: Option<Value>,
    worker_id: Option<Uuid>,
    create_worker: WorkerCreateRequest,
    eta_max: Option<String>,
    params: Vec<Required>,
    arg_overrides: BTreeMap<String, Value>,
    redactor: Redactor,
    log_root: PathBuf,
    on_loop_error: LoopErrorHandler,
}

impl JobLoop {
    pub fn new(client: ApiClient, heartbeat_interval: Duration) -> Self {
        Self {
            client,
            heartbeat_interval,
            heartbeat_timeout: None,
            required_fields: None,
            extra_filter: None,
            worker_id: None,
            create_worker: WorkerCreateRequest::default(),
            eta_max: None,
            params: Vec::new(),
            arg_overrides: BTreeMap::new(),
            redactor: Redactor::new(),
            log_root: log_root(),
            on_loop_error: Arc::new(|err| {
                tracing::error!(error = %err, "Error in task loop");
            }),
        }
    }

    /// Nested template of paths that must exist in `task.args`.
    pub fn required_fields(mut self, template: Value) -> Self {
        self.required_fields = Some(template);
        self
    }

    /// Backend filter document for dispatch.
    pub fn extra_filter(mut self, filter: Value) -> Self {
        self.extra_filter = Some(filter);
        self
    }

    /// Use an existing worker instead of creating one lazily.
    pub fn worker_id(mut self, worker_id: Uuid) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Options for the lazily created worker.
    pub fn create_worker(mut self, request: WorkerCreateRequest) -> Self {
        self.create_worker = request;
        self
    }

    /// Execution-time budget, parsed server-side at fetch.
    pub fn eta_max(mut self, eta_max: impl Into<String>) -> Self {
        self.eta_max = Some(eta_max.into());
        self
    }

    /// Watchdog timeout; defaults to three heartbeat intervals.
    pub fn heartbeat_timeout(mut self, seconds: i64) -> Self {
        self.heartbeat_timeout = Some(seconds);
        self
    }

    /// Declare a required parameter of the user function.
    pub fn required(mut self, param: Required) -> Self {
        self.params.push(param);
        self
    }

    /// Supply a non-declared argument directly.
    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arg_overrides.insert(name.into(), value);
        self
    }

    pub fn redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    /// Install a handler for errors raised outside the user function.
    /// Default: log and proceed.
    pub fn on_loop_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.on_loop_error = Arc::new(handler);
        self
    }

    async fn ensure_worker(&mut self) -> Result<Uuid> {
        if let Some(worker_id) = self.worker_id {
            return Ok(worker_id);
        }
        let worker_id = self
            .client
            .create_worker(&self.create_worker)
            .await
            .context("Failed to create worker")?;
        tracing::info!(worker_id = %worker_id, "Worker created for job loop");
        self.worker_id = Some(worker_id);
        Ok(worker_id)
    }

    /// Run the loop until the queue has no more matching tasks.
    pub async fn run<F, Fut>(mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(JobContext) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let required_template =
            union_required_template(self.required_fields.clone(), &self.params);
        // The heartbeat watchdog defaults to three missed beats.
        let heartbeat_timeout = self
            .heartbeat_timeout
            .unwrap_or((self.heartbeat_interval.as_secs_f64() * 3.0).ceil() as i64);

        loop {
            match self
                .run_one(&mut handler, required_template.clone(), heartbeat_timeout)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("No more matching tasks; job loop done");
                    return Ok(());
                }
                Err(err) => {
                    // Loop-internal error (network, coordinator 5xx):
                    // hand it to the handler and keep looping.
                    (self.on_loop_error)(&err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// One loop iteration. Ok(false) means the queue is drained.
    async fn run_one<F, Fut>(
        &mut self,
        handler: &mut F,
        required_template: Option<Value>,
        heartbeat_timeout: i64,
    ) -> Result<bool>
    where
        F: FnMut(JobContext) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let worker_id = self.ensure_worker().await?;

        let response = self
            .client
            .fetch_task(&TaskFetchRequest {
                worker_id: Some(worker_id),
                eta_max: self.eta_max.clone(),
                start_heartbeat: true,
                heartbeat_timeout: Some(heartbeat_timeout),
                required_fields: required_template,
                extra_filter: self.extra_filter.clone(),
            })
            .await
            .context("Failed to fetch task")?;

        let Some(task) = response.task.filter(|_| response.found) else {
            return Ok(false);
        };

        let run_paths = RunPaths::create_under(&self.log_root, task.task_id)?;
        run_paths.log_line(&format!(
            "fetched task {} (priority {})",
            task.task_id, task.priority
        ));

        let heartbeat =
            HeartbeatHandle::start(self.client.clone(), task.task_id, self.heartbeat_interval);

        let finished = Arc::new(AtomicBool::new(false));
        let outcome = match resolve_arguments(&self.params, &self.arg_overrides, &task.args) {
            Ok(resolved) => {
                let ctx = JobContext {
                    task: task.clone(),
                    worker_id,
                    resolved: Arc::new(resolved),
                    run_paths: run_paths.clone(),
                    client: self.client.clone(),
                    finished: finished.clone(),
                };
                let result = AssertUnwindSafe(handler(ctx.clone())).catch_unwind().await;
                match result {
                    Ok(Ok(summary)) => ctx.finish("success", summary).await,
                    Ok(Err(err)) => {
                        let summary = self.failure_summary("Error", &format!("{err:#}"));
                        run_paths.log_line(&format!("task failed: {}", self.redactor.redact(&err.to_string())));
                        ctx.finish("failed", summary).await
                    }
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "task panicked".to_string());
                        let summary = self.failure_summary("Panic", &message);
                        run_paths.log_line(&format!("task panicked: {}", self.redactor.redact(&message)));
                        ctx.finish("failed", summary).await
                    }
                }
            }
            Err(err) => {
                // Argument resolution failed: the task cannot run at all.
                let summary = self.failure_summary("ResolveError", &format!("{err:#}"));
                self.client
                    .report_task_status(task.task_id, "failed", Some(summary))
                    .await
            }
        };

        heartbeat.stop().await;
        outcome?;
        Ok(true)
    }

    fn failure_summary(&self, kind: &str, message: &str) -> Value {
        serde_json::json!({
            "labtasker_exception": {
                "type": kind,
                "message": self.redactor.redact(message),
                "traceback": self.redactor.redact(message),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn union_template_adds_param_paths() {
        let params = vec![
            Required::new("lr"),
            Required::new("depth").alias("model.depth"),
        ];
        let merged = union_required_template(Some(json!({"dataset": null})), &params).unwrap();
        assert_eq!(
            merged,
            json!({"dataset": null, "lr": null, "model": {"depth": null}})
        );

        let from_scratch = union_required_template(None, &params).unwrap();
        assert_eq!(from_scratch, json!({"lr": null, "model": {"depth": null}}));

        assert_eq!(union_required_template(None, &[]), None);
    }

    #[test]
    fn resolve_uses_alias_and_resolver() {
        let params = vec![
            Required::new("lr"),
            Required::new("epochs").alias("train.epochs").resolver(|v| {
                let n = v.as_i64().ok_or_else(|| anyhow::anyhow!("not an int"))?;
                Ok(json!(n * 2))
            }),
        ];
        let args = json!({"lr": 0.1, "train": {"epochs": 5}});
        let resolved = resolve_arguments(&params, &BTreeMap::new(), &args).unwrap();
        assert_eq!(resolved["lr"], json!(0.1));
        assert_eq!(resolved["epochs"], json!(10));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let params = vec![Required::new("lr")];
        let err = resolve_arguments(&params, &BTreeMap::new(), &json!({})).unwrap_err();
        assert!(err.to_string().contains("lr"));

        // Null leaves do not satisfy the declaration.
        let err = resolve_arguments(&params, &BTreeMap::new(), &json!({"lr": null})).unwrap_err();
        assert!(err.to_string().contains("lr"));
    }

    #[test]
    fn declared_and_supplied_conflict() {
        let params = vec![Required::new("lr")];
        let overrides = BTreeMap::from([("lr".to_string(), json!(1))]);
        assert!(resolve_arguments(&params, &overrides, &json!({"lr": 0.1})).is_err());
    }

    #[test]
    fn overrides_pass_through_for_undeclared_names() {
        let overrides = BTreeMap::from([("device".to_string(), json!("cuda:0"))]);
        let resolved = resolve_arguments(&[], &overrides, &json!({})).unwrap();
        assert_eq!(resolved["device"], json!("cuda:0"));
    }

    #[test]
    fn resolver_failure_is_reported_with_context() {
        let params =
            vec![Required::new("n").resolver(|_| Err(anyhow::anyhow!("bad cast")))];
        let err = resolve_arguments(&params, &BTreeMap::new(), &json!({"n": 1})).unwrap_err();
        assert!(format!("{err:#}").contains("bad cast"));
    }

    #[test]
    fn finish_artifacts_are_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let run_paths = RunPaths::create_under(dir.path(), Uuid::new_v4()).unwrap();

        let first =
            write_finish_artifacts(&run_paths, "success", &json!({"result": "ok"})).unwrap();
        assert!(first);

        let status: Value =
            serde_json::from_str(&std::fs::read_to_string(run_paths.status_file()).unwrap())
                .unwrap();
        assert_eq!(status, json!({"status": "success"}));

        // Second finish hits the sentinel and is a no-op.
        let second = write_finish_artifacts(&run_paths, "failed", &json!({})).unwrap();
        assert!(!second);
        let summary: Value =
            serde_json::from_str(&std::fs::read_to_string(run_paths.summary_file()).unwrap())
                .unwrap();
        assert_eq!(summary, json!({"result": "ok"}));
    }
}
