//! Filesystem layout for client state and per-task run artifacts.
//!
//! Everything lives under `$LABTASKER_ROOT` (default `.labtasker`):
//! `client.env` plus `logs/run/run-<task_id>_<timestamp>/` directories
//! holding `run.log`, `status.json`, and `summary.json` for each task run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

pub fn labtasker_root() -> PathBuf {
    std::env::var("LABTASKER_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".labtasker"))
}

pub fn client_config_path() -> PathBuf {
    labtasker_root().join("client.env")
}

pub fn log_root() -> PathBuf {
    labtasker_root().join("logs")
}

/// Paths of one task run's artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    dir: PathBuf,
}

impl RunPaths {
    /// Create `<log_root>/run/run-<task_id>_<timestamp>/`.
    pub fn create(task_id: Uuid) -> Result<Self> {
        Self::create_under(&log_root(), task_id)
    }

    pub fn create_under(log_root: &Path, task_id: Uuid) -> Result<Self> {
        let stamp = Utc::now().format("%Y-%m-%d-%H-%M-%S");
        let dir = log_root.join("run").join(format!("run-{}_{}", task_id, stamp));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_log(&self) -> PathBuf {
        self.dir.join("run.log")
    }

    pub fn status_file(&self) -> PathBuf {
        self.dir.join("status.json")
    }

    pub fn summary_file(&self) -> PathBuf {
        self.dir.join("summary.json")
    }

    /// Append a line to `run.log`. Best-effort; logging must not take the
    /// run down.
    pub fn log_line(&self, line: &str) {
        use std::io::Write;
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_log())
        {
            let _ = writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_dir_layout() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = Uuid::new_v4();
        let paths = RunPaths::create_under(dir.path(), task_id).unwrap();

        assert!(paths.dir().exists());
        let name = paths.dir().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("run-{}_", task_id)));

        paths.log_line("hello");
        let contents = std::fs::read_to_string(paths.run_log()).unwrap();
        assert!(contents.contains("hello"));
    }
}
