//! Client configuration.
//!
//! A TOML document at `$LABTASKER_ROOT/client.env` with the connection
//! settings for one queue. Unknown keys (e.g. a `cli_plugins` table) are
//! preserved across load/save.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::paths::client_config_path;

fn default_heartbeat_interval() -> f64 {
    30.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub queue_name: String,
    /// Secret; registered with the redactor before any output happens.
    pub password: String,
    /// Seconds between heartbeat refreshes.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: f64,
    /// Optional CLI plugin configuration, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_plugins: Option<toml::Table>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            queue_name: String::new(),
            password: String::new(),
            heartbeat_interval: default_heartbeat_interval(),
            cli_plugins: None,
        }
    }
}

impl ClientConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client config: {}", path.display()))?;
        let config: ClientConfig = toml::from_str(&raw)
            .with_context(|| format!("Invalid client config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$LABTASKER_ROOT/client.env`.
    pub fn load() -> Result<Self> {
        Self::load_from(&client_config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("Failed to serialize client config")?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write client config: {}", path.display()))?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&client_config_path())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(anyhow::anyhow!("api_base_url must be set"));
        }
        if self.queue_name.is_empty() {
            return Err(anyhow::anyhow!("queue_name must be set"));
        }
        if self.heartbeat_interval <= 0.0 {
            return Err(anyhow::anyhow!("heartbeat_interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_plugins_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.env");

        let raw = r#"
api_base_url = "http://localhost:8080"
queue_name = "test_queue"
password = "test_password"
heartbeat_interval = 12.5

[cli_plugins]
loaded = ["pager"]
"#;
        std::fs::write(&path, raw).unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.queue_name, "test_queue");
        assert_eq!(config.heartbeat_interval, 12.5);
        assert!(config.cli_plugins.is_some());

        config.save_to(&path).unwrap();
        let reloaded = ClientConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.cli_plugins, config.cli_plugins);
    }

    #[test]
    fn heartbeat_interval_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.env");
        std::fs::write(
            &path,
            "api_base_url = \"http://x\"\nqueue_name = \"q\"\npassword = \"p\"\n",
        )
        .unwrap();
        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.heartbeat_interval, 30.0);
    }

    #[test]
    fn invalid_configs_rejected() {
        let mut config = ClientConfig {
            queue_name: "q".into(),
            ..Default::default()
        };
        config.heartbeat_interval = 0.0;
        assert!(config.validate().is_err());

        let config = ClientConfig::default();
        assert!(config.validate().is_err()); // empty queue name
    }
}
