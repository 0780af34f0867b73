use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Open a Postgres connection pool from the configured DSN.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("database connection failed")?;

    Ok(pool)
}
