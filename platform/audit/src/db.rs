use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DbConfig;

/// Initialize a connection pool to the PostgreSQL database
pub async fn init_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    tracing::debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Connecting to audit database"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
}

/// Apply the embedded `audit_records` migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./db/migrations").run(pool).await?;
    tracing::info!("Audit ledger migrations applied");
    Ok(())
}
