use crate::schema::quote_identifier;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

/// Creates and checks the tables the consolidation engine works on.
pub struct DatabaseSetup {
    db_pool: Arc<PgPool>,
    asset_table: String,
}

impl DatabaseSetup {
    pub fn new(db_pool: Arc<PgPool>, asset_table: impl Into<String>) -> Self {
        Self {
            db_pool,
            asset_table: asset_table.into(),
        }
    }

    fn statements(&self) -> Result<Vec<String>> {
        let assets = quote_identifier(&self.asset_table)?;
        let index_prefix = self.asset_table.as_str();

        Ok(vec![
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {assets} (
                    id BIGSERIAL PRIMARY KEY,
                    content_hash TEXT NOT NULL,
                    size_bytes BIGINT NOT NULL DEFAULT 0,
                    location TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{index_prefix}_content_hash_idx" ON {assets} (content_hash)"#
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{index_prefix}_location_idx" ON {assets} (location text_pattern_ops)"#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS asset_references (
                    id BIGSERIAL PRIMARY KEY,
                    asset_id BIGINT NOT NULL REFERENCES {assets} (id),
                    owner_table TEXT NOT NULL,
                    owner_id BIGINT NOT NULL,
                    field_name TEXT NOT NULL
                )
                "#
            ),
            "CREATE INDEX IF NOT EXISTS asset_references_asset_idx ON asset_references (asset_id)"
                .to_string(),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS asset_metadata (
                    id BIGSERIAL PRIMARY KEY,
                    asset_id BIGINT NOT NULL REFERENCES {assets} (id) ON DELETE CASCADE,
                    title TEXT,
                    description TEXT
                )
                "#
            ),
            r#"
            CREATE TABLE IF NOT EXISTS reference_index (
                id BIGSERIAL PRIMARY KEY,
                owner_table TEXT NOT NULL,
                owner_id BIGINT NOT NULL,
                field_name TEXT NOT NULL,
                ref_table TEXT NOT NULL,
                ref_id BIGINT NOT NULL
            )
            "#
            .to_string(),
            "CREATE INDEX IF NOT EXISTS reference_index_target_idx ON reference_index (ref_table, ref_id)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS reference_index_owner_idx ON reference_index (owner_table, owner_id)"
                .to_string(),
        ])
    }

    /// Create any missing table or index. Safe to run repeatedly.
    pub async fn ensure_schema(&self) -> Result<()> {
        info!("Ensuring consolidation schema (asset table {})", self.asset_table);

        for statement in self.statements()? {
            sqlx::query(&statement)
                .execute(self.db_pool.as_ref())
                .await
                .with_context(|| format!("Failed to run: {}", statement.trim()))?;
        }

        info!("Schema ready");
        Ok(())
    }

    /// Quick database health check
    pub async fn health_check(&self) -> Result<DatabaseHealth> {
        let mut health = DatabaseHealth {
            checked_at: Utc::now(),
            ..Default::default()
        };

        match sqlx::query("SELECT 1").fetch_one(self.db_pool.as_ref()).await {
            Ok(_) => health.connectivity = true,
            Err(e) => {
                health.issues.push(format!("Connectivity failed: {e}"));
                return Ok(health);
            }
        }

        let required_tables = [
            self.asset_table.as_str(),
            "asset_references",
            "asset_metadata",
            "reference_index",
        ];
        let mut tables_found = 0;
        for table in required_tables {
            let found: Result<Option<i32>, sqlx::Error> = sqlx::query_scalar(
                "SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1",
            )
            .bind(table)
            .fetch_optional(self.db_pool.as_ref())
            .await;

            match found {
                Ok(Some(_)) => tables_found += 1,
                Ok(None) => health.issues.push(format!("Table '{table}' missing")),
                Err(e) => health.issues.push(format!("Failed to check table {table}: {e}")),
            }
        }
        health.schema_ready = tables_found == required_tables.len();

        if health.schema_ready {
            let query = format!("SELECT COUNT(*) FROM {}", quote_identifier(&self.asset_table)?);
            match sqlx::query_scalar::<_, i64>(&query)
                .fetch_one(self.db_pool.as_ref())
                .await
            {
                Ok(count) => health.asset_count = count.max(0) as u64,
                Err(e) => health.issues.push(format!("Failed to count assets: {e}")),
            }
        }

        Ok(health)
    }
}

/// Database health status
#[derive(Debug, Default, Serialize)]
pub struct DatabaseHealth {
    pub connectivity: bool,
    pub schema_ready: bool,
    pub asset_count: u64,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl DatabaseHealth {
    pub fn is_healthy(&self) -> bool {
        self.connectivity && self.schema_ready && self.issues.is_empty()
    }

    pub fn status_summary(&self) -> String {
        if self.is_healthy() {
            format!("Healthy ({} assets)", self.asset_count)
        } else {
            format!("Issues: {}", self.issues.join(", "))
        }
    }
}
