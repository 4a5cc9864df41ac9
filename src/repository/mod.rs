pub mod in_memory;
pub mod postgres;

use crate::config::Config;
use crate::error::Result;
use crate::models::{AssetRecord, AssetScope, FieldFilter, ReferenceRow};
use async_trait::async_trait;

pub use in_memory::{InMemoryConsolidationRepository, Mutation, Operation};
pub use postgres::PostgresConsolidationRepository;

/// Table names and policies shared by every repository implementation.
#[derive(Debug, Clone)]
pub struct RepositorySettings {
    /// Table holding asset records; also the `ref_table` value of index rows
    /// that point at assets
    pub asset_table: String,
    /// Location prefix marking the staging subset
    pub staging_prefix: String,
    /// Index rows owned by these tables are bookkeeping and never retargeted
    pub excluded_owner_tables: Vec<String>,
}

impl RepositorySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            asset_table: config.reference_index.asset_table.clone(),
            staging_prefix: config.storage.staging_prefix.clone(),
            excluded_owner_tables: config.reference_index.excluded_owner_tables.clone(),
        }
    }

    pub fn is_excluded_owner(&self, owner_table: &str) -> bool {
        self.excluded_owner_tables
            .iter()
            .any(|excluded| excluded == owner_table)
    }
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Relational store operations used by the consolidation engine.
///
/// Structured references come in two kinds: rows of the reference table,
/// whose `asset_id` is a foreign key to an asset, and rows of the
/// denormalized reference index whose `ref_id` points at an asset. Index
/// rows owned by the excluded bookkeeping tables are never counted or
/// rewritten.
#[async_trait]
pub trait ConsolidationRepository: Send + Sync + std::fmt::Debug {
    /// Assets in scope, ascending by id.
    async fn list_assets(&self, scope: AssetScope) -> Result<Vec<AssetRecord>>;

    /// Every asset, ascending by id.
    async fn list_all_assets(&self) -> Result<Vec<AssetRecord>>;

    async fn count_references(&self, asset_id: i64, filter: Option<&FieldFilter>) -> Result<u64>;

    /// Repoint reference rows; returns rows changed.
    async fn update_references(
        &self,
        from: i64,
        to: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64>;

    async fn count_index_entries(&self, asset_id: i64, filter: Option<&FieldFilter>)
        -> Result<u64>;

    /// Repoint index rows; returns rows changed.
    async fn update_index_entries(
        &self,
        from: i64,
        to: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64>;

    /// Rows of `table` whose `field` contains `needle`, ascending by id.
    async fn fetch_field_rows(
        &self,
        table: &str,
        field: &str,
        needle: &str,
    ) -> Result<Vec<ReferenceRow>>;

    async fn update_field(&self, row: &ReferenceRow, content: &str) -> Result<()>;

    /// Repoint index rows owned by one record from `from` to `to`.
    async fn retarget_owner_index(
        &self,
        owner_table: &str,
        owner_id: i64,
        from: i64,
        to: i64,
    ) -> Result<u64>;

    async fn remove_asset(&self, asset_id: i64) -> Result<()>;
}
