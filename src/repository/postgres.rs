use super::{ConsolidationRepository, RepositorySettings};
use crate::error::Result;
use crate::models::{AssetRecord, AssetScope, FieldFilter, ReferenceRow};
use crate::schema::quote_identifier;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;

/// PostgreSQL implementation of the consolidation repository.
///
/// Every statement runs on its own; there is no transaction spanning rows.
#[derive(Debug)]
pub struct PostgresConsolidationRepository {
    db_pool: Arc<PgPool>,
    settings: RepositorySettings,
    asset_table: String,
}

impl PostgresConsolidationRepository {
    pub fn new(db_pool: Arc<PgPool>, settings: RepositorySettings) -> Result<Self> {
        let asset_table = quote_identifier(&settings.asset_table)?;
        Ok(Self {
            db_pool,
            settings,
            asset_table,
        })
    }

    pub fn pool(&self) -> &PgPool {
        self.db_pool.as_ref()
    }

    async fn fetch_assets(&self, scope: Option<AssetScope>) -> Result<Vec<AssetRecord>> {
        // left(...) rather than LIKE: the default prefix starts with '_',
        // which LIKE treats as a wildcard
        let query = format!(
            r#"
            SELECT id, content_hash, size_bytes, location,
                   left(location, length($1)) = $1 AS in_staging
            FROM {table}
            WHERE $2::boolean IS NULL OR (left(location, length($1)) = $1) = $2
            ORDER BY id ASC
            "#,
            table = self.asset_table
        );

        let staged = scope.map(|scope| scope == AssetScope::Staged);
        let records = sqlx::query_as::<_, AssetRecord>(&query)
            .bind(&self.settings.staging_prefix)
            .bind(staged)
            .fetch_all(self.pool())
            .await?;

        debug!("Fetched {} assets for scope {:?}", records.len(), scope);
        Ok(records)
    }
}

fn filter_parts(filter: Option<&FieldFilter>) -> (Option<&str>, Option<&str>) {
    match filter {
        Some(filter) => (Some(filter.table.as_str()), Some(filter.field.as_str())),
        None => (None, None),
    }
}

#[async_trait]
impl ConsolidationRepository for PostgresConsolidationRepository {
    async fn list_assets(&self, scope: AssetScope) -> Result<Vec<AssetRecord>> {
        self.fetch_assets(Some(scope)).await
    }

    async fn list_all_assets(&self) -> Result<Vec<AssetRecord>> {
        self.fetch_assets(None).await
    }

    async fn count_references(&self, asset_id: i64, filter: Option<&FieldFilter>) -> Result<u64> {
        let (table, field) = filter_parts(filter);
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM asset_references
            WHERE asset_id = $1
              AND ($2::text IS NULL OR owner_table = $2)
              AND ($3::text IS NULL OR field_name = $3)
            "#,
        )
        .bind(asset_id)
        .bind(table)
        .bind(field)
        .fetch_one(self.pool())
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn update_references(
        &self,
        from: i64,
        to: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let (table, field) = filter_parts(filter);
        let result = sqlx::query(
            r#"
            UPDATE asset_references SET asset_id = $2
            WHERE asset_id = $1
              AND ($3::text IS NULL OR owner_table = $3)
              AND ($4::text IS NULL OR field_name = $4)
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(table)
        .bind(field)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_index_entries(
        &self,
        asset_id: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let (table, field) = filter_parts(filter);
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM reference_index
            WHERE ref_table = $1 AND ref_id = $2
              AND owner_table <> ALL($3)
              AND ($4::text IS NULL OR owner_table = $4)
              AND ($5::text IS NULL OR field_name = $5)
            "#,
        )
        .bind(&self.settings.asset_table)
        .bind(asset_id)
        .bind(&self.settings.excluded_owner_tables)
        .bind(table)
        .bind(field)
        .fetch_one(self.pool())
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn update_index_entries(
        &self,
        from: i64,
        to: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let (table, field) = filter_parts(filter);
        let result = sqlx::query(
            r#"
            UPDATE reference_index SET ref_id = $3
            WHERE ref_table = $1 AND ref_id = $2
              AND owner_table <> ALL($4)
              AND ($5::text IS NULL OR owner_table = $5)
              AND ($6::text IS NULL OR field_name = $6)
            "#,
        )
        .bind(&self.settings.asset_table)
        .bind(from)
        .bind(to)
        .bind(&self.settings.excluded_owner_tables)
        .bind(table)
        .bind(field)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn fetch_field_rows(
        &self,
        table: &str,
        field: &str,
        needle: &str,
    ) -> Result<Vec<ReferenceRow>> {
        let query = format!(
            "SELECT id, {column}::text FROM {table} WHERE strpos({column}, $1) > 0 ORDER BY id ASC",
            column = quote_identifier(field)?,
            table = quote_identifier(table)?,
        );

        let rows = sqlx::query_as::<_, (i64, String)>(&query)
            .bind(needle)
            .fetch_all(self.pool())
            .await?;

        debug!("Fetched {} rows from {}.{} containing '{}'", rows.len(), table, field, needle);

        Ok(rows
            .into_iter()
            .map(|(owner_id, raw_content)| ReferenceRow {
                owner_table: table.to_string(),
                owner_id,
                field_name: field.to_string(),
                raw_content,
            })
            .collect())
    }

    async fn update_field(&self, row: &ReferenceRow, content: &str) -> Result<()> {
        let query = format!(
            "UPDATE {table} SET {column} = $1 WHERE id = $2",
            table = quote_identifier(&row.owner_table)?,
            column = quote_identifier(&row.field_name)?,
        );

        sqlx::query(&query)
            .bind(content)
            .bind(row.owner_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    async fn retarget_owner_index(
        &self,
        owner_table: &str,
        owner_id: i64,
        from: i64,
        to: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reference_index SET ref_id = $3
            WHERE ref_table = $1 AND ref_id = $2
              AND owner_table = $4 AND owner_id = $5
              AND owner_table <> ALL($6)
            "#,
        )
        .bind(&self.settings.asset_table)
        .bind(from)
        .bind(to)
        .bind(owner_table)
        .bind(owner_id)
        .bind(&self.settings.excluded_owner_tables)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn remove_asset(&self, asset_id: i64) -> Result<()> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.asset_table);
        sqlx::query(&query)
            .bind(asset_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
