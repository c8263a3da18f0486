//! Server configuration
//!
//! Flat environment-variable configuration for the coordinator binary,
//! loaded once at startup and validated before anything touches the
//! database.

use std::env;

const DEFAULT_API_HOST: &str = "0.0.0.0";
const DEFAULT_API_PORT: u16 = 8080;
const DEFAULT_BCRYPT_COST: u32 = 12;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 12;
const DEFAULT_PERIODIC_TASK_INTERVAL_SECS: f64 = 30.0;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;

/// Coordinator configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub database_url: String,
    pub api_host: String,
    pub api_port: u16,
    /// Server-side secret mixed into passwords before bcrypt hashing.
    pub security_pepper: String,
    pub bcrypt_cost: u32,
    pub min_password_length: usize,
    /// Seconds between timeout-sweeper wakeups.
    pub periodic_task_interval: f64,
    /// Enables the injection-prone raw query/update endpoints. Test-only.
    pub allow_unsafe_behavior: bool,
    pub db_max_connections: u32,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = ServerConfig {
            database_url: env::var("LABTASKER_DATABASE_URL")
                .or_else(|_| env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("LABTASKER_DATABASE_URL or DATABASE_URL must be set")
                })?,
            api_host: env::var("LABTASKER_API_HOST")
                .unwrap_or_else(|_| DEFAULT_API_HOST.to_string()),
            api_port: env::var("LABTASKER_API_PORT")
                .unwrap_or_else(|_| DEFAULT_API_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LABTASKER_API_PORT must be a valid port number"))?,
            security_pepper: env::var("LABTASKER_SECURITY_PEPPER").unwrap_or_default(),
            bcrypt_cost: env::var("LABTASKER_BCRYPT_COST")
                .unwrap_or_else(|_| DEFAULT_BCRYPT_COST.to_string())
                .parse()
                .unwrap_or(DEFAULT_BCRYPT_COST),
            min_password_length: env::var("LABTASKER_MIN_PASSWORD_LENGTH")
                .unwrap_or_else(|_| DEFAULT_MIN_PASSWORD_LENGTH.to_string())
                .parse()
                .unwrap_or(DEFAULT_MIN_PASSWORD_LENGTH),
            periodic_task_interval: env::var("LABTASKER_PERIODIC_TASK_INTERVAL")
                .unwrap_or_else(|_| DEFAULT_PERIODIC_TASK_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(DEFAULT_PERIODIC_TASK_INTERVAL_SECS),
            allow_unsafe_behavior: env::var("LABTASKER_ALLOW_UNSAFE_BEHAVIOR")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
            db_max_connections: env::var("LABTASKER_DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| DEFAULT_DB_MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "LABTASKER_DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }
        if self.bcrypt_cost < 10 {
            return Err(anyhow::anyhow!("LABTASKER_BCRYPT_COST must be at least 10"));
        }
        if self.min_password_length < 8 {
            return Err(anyhow::anyhow!(
                "LABTASKER_MIN_PASSWORD_LENGTH must be at least 8"
            ));
        }
        if self.periodic_task_interval <= 0.0 {
            return Err(anyhow::anyhow!(
                "LABTASKER_PERIODIC_TASK_INTERVAL must be positive"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            database_url: "postgresql://localhost/labtasker".to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            security_pepper: String::new(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            periodic_task_interval: DEFAULT_PERIODIC_TASK_INTERVAL_SECS,
            allow_unsafe_behavior: false,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn weak_bcrypt_cost_rejected() {
        let mut config = base_config();
        config.bcrypt_cost = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_min_password_length_rejected() {
        let mut config = base_config();
        config.min_password_length = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_postgres_url_rejected() {
        let mut config = base_config();
        config.database_url = "mysql://localhost/labtasker".to_string();
        assert!(config.validate().is_err());
    }
}
