use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use labtasker_api::{router, state::AppState, sweeper};
use labtasker_core::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = ServerConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    labtasker_db::MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let state = AppState::new(pool, &config);

    // Background loop enforcing heartbeat/execution timeouts.
    let _sweeper = sweeper::spawn_sweeper(state.tasks.clone(), config.periodic_task_interval);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Labtasker coordinator listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
