use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use url::Url;

/// Open a Postgres pool and check it answers.
///
/// Every phase awaits one statement at a time, so a handful of connections
/// is plenty.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    connection_timeout_seconds: u64,
) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(connection_timeout_seconds))
        .idle_timeout(Some(Duration::from_secs(300)))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .with_context(|| format!("Failed to connect to {}", redact_database_url(database_url)))?;

    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .context("Database did not answer a test query")?;

    info!(
        "Connected to {} with {} max connections",
        redact_database_url(database_url),
        max_connections
    );

    Ok(pool)
}

/// Database URL safe to log: the password is replaced.
pub fn redact_database_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}
