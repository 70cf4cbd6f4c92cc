use crate::config::DbSettings;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Connect the pool and bring the schema up to date.
pub async fn init_pool(database_url: &str, settings: &DbSettings) -> Result<PgPool, sqlx::Error> {
    info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        acquire_timeout_secs = settings.acquire_timeout_secs,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
