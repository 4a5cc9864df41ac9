//! In-process repository for tests and dry demonstrations.
//!
//! Holds the same four kinds of data as the Postgres schema and records
//! every mutating call, so callers can assert that a dry run wrote nothing.

use super::{ConsolidationRepository, RepositorySettings};
use crate::error::{ConsolidationError, Result};
use crate::models::{AssetRecord, AssetScope, FieldFilter, ReferenceRow};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Repository operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListAssets,
    CountReferences,
    UpdateReferences,
    CountIndexEntries,
    UpdateIndexEntries,
    FetchFieldRows,
    UpdateField,
    RetargetOwnerIndex,
    RemoveAsset,
}

/// A mutating call as it reached the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    UpdateReferences { from: i64, to: i64, rows: u64 },
    UpdateIndexEntries { from: i64, to: i64, rows: u64 },
    UpdateField { table: String, field: String, owner_id: i64 },
    RetargetOwnerIndex { owner_table: String, owner_id: i64, from: i64, to: i64, rows: u64 },
    RemoveAsset { asset_id: i64 },
}

#[derive(Debug, Clone)]
struct ReferenceEntry {
    asset_id: i64,
    owner_table: String,
    field_name: String,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    owner_table: String,
    owner_id: i64,
    field_name: String,
    ref_table: String,
    ref_id: i64,
}

#[derive(Debug, Default)]
struct State {
    assets: BTreeMap<i64, (String, i64, String)>,
    references: Vec<ReferenceEntry>,
    index: Vec<IndexEntry>,
    fields: BTreeMap<(String, String), BTreeMap<i64, String>>,
    failing: HashSet<Operation>,
    mutations: Vec<Mutation>,
}

#[derive(Debug)]
pub struct InMemoryConsolidationRepository {
    settings: RepositorySettings,
    state: Mutex<State>,
}

impl InMemoryConsolidationRepository {
    pub fn new(settings: RepositorySettings) -> Self {
        Self {
            settings,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, state: &State, operation: Operation) -> Result<()> {
        if state.failing.contains(&operation) {
            return Err(ConsolidationError::Query {
                message: format!("injected failure for {operation:?}"),
            });
        }
        Ok(())
    }

    fn to_record(&self, id: i64, (hash, size, location): &(String, i64, String)) -> AssetRecord {
        AssetRecord {
            id,
            content_hash: hash.clone(),
            size_bytes: *size,
            location: location.clone(),
            in_staging: location.starts_with(&self.settings.staging_prefix),
        }
    }

    fn counts_index_entry(&self, entry: &IndexEntry, asset_id: i64) -> bool {
        entry.ref_table == self.settings.asset_table
            && entry.ref_id == asset_id
            && !self.settings.is_excluded_owner(&entry.owner_table)
    }

    pub fn add_asset(&self, id: i64, content_hash: &str, size_bytes: i64, location: &str) {
        self.state().assets.insert(
            id,
            (content_hash.to_string(), size_bytes, location.to_string()),
        );
    }

    pub fn add_reference(&self, asset_id: i64, owner_table: &str, field_name: &str) {
        self.state().references.push(ReferenceEntry {
            asset_id,
            owner_table: owner_table.to_string(),
            field_name: field_name.to_string(),
        });
    }

    /// Add an index row pointing at an asset.
    pub fn add_index_entry(&self, owner_table: &str, owner_id: i64, field_name: &str, asset_id: i64) {
        let ref_table = self.settings.asset_table.clone();
        self.state().index.push(IndexEntry {
            owner_table: owner_table.to_string(),
            owner_id,
            field_name: field_name.to_string(),
            ref_table,
            ref_id: asset_id,
        });
    }

    pub fn set_field(&self, table: &str, field: &str, owner_id: i64, content: &str) {
        self.state()
            .fields
            .entry((table.to_string(), field.to_string()))
            .or_default()
            .insert(owner_id, content.to_string());
    }

    pub fn field(&self, table: &str, field: &str, owner_id: i64) -> Option<String> {
        self.state()
            .fields
            .get(&(table.to_string(), field.to_string()))
            .and_then(|rows| rows.get(&owner_id).cloned())
    }

    pub fn has_asset(&self, asset_id: i64) -> bool {
        self.state().assets.contains_key(&asset_id)
    }

    /// Reference-table rows pointing at an asset.
    pub fn references_to(&self, asset_id: i64) -> usize {
        self.state()
            .references
            .iter()
            .filter(|entry| entry.asset_id == asset_id)
            .count()
    }

    /// Index rows pointing at an asset, bookkeeping owners included.
    pub fn index_entries_to(&self, asset_id: i64) -> usize {
        let state = self.state();
        state
            .index
            .iter()
            .filter(|entry| entry.ref_table == self.settings.asset_table && entry.ref_id == asset_id)
            .count()
    }

    pub fn fail_on(&self, operation: Operation) {
        self.state().failing.insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.state().failing.remove(&operation);
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }
}

fn matches_filter(filter: Option<&FieldFilter>, table: &str, field: &str) -> bool {
    filter.map_or(true, |filter| filter.matches(table, field))
}

#[async_trait]
impl ConsolidationRepository for InMemoryConsolidationRepository {
    async fn list_assets(&self, scope: AssetScope) -> Result<Vec<AssetRecord>> {
        let state = self.state();
        self.check(&state, Operation::ListAssets)?;
        let wanted = scope == AssetScope::Staged;

        Ok(state
            .assets
            .iter()
            .map(|(id, row)| self.to_record(*id, row))
            .filter(|record| record.in_staging == wanted)
            .collect())
    }

    async fn list_all_assets(&self) -> Result<Vec<AssetRecord>> {
        let state = self.state();
        self.check(&state, Operation::ListAssets)?;

        Ok(state
            .assets
            .iter()
            .map(|(id, row)| self.to_record(*id, row))
            .collect())
    }

    async fn count_references(&self, asset_id: i64, filter: Option<&FieldFilter>) -> Result<u64> {
        let state = self.state();
        self.check(&state, Operation::CountReferences)?;

        Ok(state
            .references
            .iter()
            .filter(|entry| entry.asset_id == asset_id)
            .filter(|entry| matches_filter(filter, &entry.owner_table, &entry.field_name))
            .count() as u64)
    }

    async fn update_references(
        &self,
        from: i64,
        to: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let mut state = self.state();
        self.check(&state, Operation::UpdateReferences)?;

        let mut rows = 0;
        for entry in state.references.iter_mut() {
            if entry.asset_id == from
                && matches_filter(filter, &entry.owner_table, &entry.field_name)
            {
                entry.asset_id = to;
                rows += 1;
            }
        }

        state
            .mutations
            .push(Mutation::UpdateReferences { from, to, rows });
        Ok(rows)
    }

    async fn count_index_entries(
        &self,
        asset_id: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let state = self.state();
        self.check(&state, Operation::CountIndexEntries)?;

        Ok(state
            .index
            .iter()
            .filter(|entry| self.counts_index_entry(entry, asset_id))
            .filter(|entry| matches_filter(filter, &entry.owner_table, &entry.field_name))
            .count() as u64)
    }

    async fn update_index_entries(
        &self,
        from: i64,
        to: i64,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let mut state = self.state();
        self.check(&state, Operation::UpdateIndexEntries)?;

        let mut rows = 0;
        for entry in state.index.iter_mut() {
            if self.counts_index_entry(entry, from)
                && matches_filter(filter, &entry.owner_table, &entry.field_name)
            {
                entry.ref_id = to;
                rows += 1;
            }
        }

        state
            .mutations
            .push(Mutation::UpdateIndexEntries { from, to, rows });
        Ok(rows)
    }

    async fn fetch_field_rows(
        &self,
        table: &str,
        field: &str,
        needle: &str,
    ) -> Result<Vec<ReferenceRow>> {
        let state = self.state();
        self.check(&state, Operation::FetchFieldRows)?;

        let Some(rows) = state.fields.get(&(table.to_string(), field.to_string())) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .iter()
            .filter(|(_, content)| content.contains(needle))
            .map(|(owner_id, content)| ReferenceRow {
                owner_table: table.to_string(),
                owner_id: *owner_id,
                field_name: field.to_string(),
                raw_content: content.clone(),
            })
            .collect())
    }

    async fn update_field(&self, row: &ReferenceRow, content: &str) -> Result<()> {
        let mut state = self.state();
        self.check(&state, Operation::UpdateField)?;

        state
            .fields
            .entry((row.owner_table.clone(), row.field_name.clone()))
            .or_default()
            .insert(row.owner_id, content.to_string());

        state.mutations.push(Mutation::UpdateField {
            table: row.owner_table.clone(),
            field: row.field_name.clone(),
            owner_id: row.owner_id,
        });
        Ok(())
    }

    async fn retarget_owner_index(
        &self,
        owner_table: &str,
        owner_id: i64,
        from: i64,
        to: i64,
    ) -> Result<u64> {
        let mut state = self.state();
        self.check(&state, Operation::RetargetOwnerIndex)?;

        let mut rows = 0;
        for entry in state.index.iter_mut() {
            if self.counts_index_entry(entry, from)
                && entry.owner_table == owner_table
                && entry.owner_id == owner_id
            {
                entry.ref_id = to;
                rows += 1;
            }
        }

        state.mutations.push(Mutation::RetargetOwnerIndex {
            owner_table: owner_table.to_string(),
            owner_id,
            from,
            to,
            rows,
        });
        Ok(rows)
    }

    async fn remove_asset(&self, asset_id: i64) -> Result<()> {
        let mut state = self.state();
        self.check(&state, Operation::RemoveAsset)?;

        state.assets.remove(&asset_id);
        state.mutations.push(Mutation::RemoveAsset { asset_id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> InMemoryConsolidationRepository {
        let repo = InMemoryConsolidationRepository::new(RepositorySettings::default());
        repo.add_asset(1, "aa", 10, "docs/a.pdf");
        repo.add_asset(2, "aa", 10, "_migrated/a.pdf");
        repo.add_reference(2, "content", "image");
        repo.add_index_entry("content", 7, "image", 2);
        repo.add_index_entry("asset_metadata", 2, "file", 2);
        repo
    }

    #[tokio::test]
    async fn test_scopes_follow_staging_prefix() {
        let repo = repository();
        let staged = repo.list_assets(AssetScope::Staged).await.unwrap();
        let outside = repo.list_assets(AssetScope::Outside).await.unwrap();

        assert_eq!(staged.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
        assert!(staged[0].in_staging);
        assert_eq!(outside.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(repo.list_all_assets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bookkeeping_index_rows_are_never_touched() {
        let repo = repository();
        assert_eq!(repo.count_index_entries(2, None).await.unwrap(), 1);
        assert_eq!(repo.update_index_entries(2, 1, None).await.unwrap(), 1);

        assert_eq!(repo.index_entries_to(2), 1);
        assert_eq!(repo.index_entries_to(1), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_surface_as_query_errors() {
        let repo = repository();
        repo.fail_on(Operation::CountReferences);

        let err = repo.count_references(2, None).await.unwrap_err();
        assert!(err.is_query());

        repo.recover(Operation::CountReferences);
        assert_eq!(repo.count_references(2, None).await.unwrap(), 1);
        assert!(repo.mutations().is_empty());
    }
}
