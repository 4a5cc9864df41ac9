use crate::error::Result;
use crate::models::FieldFilter;
use crate::repository::ConsolidationRepository;
use serde::Serialize;
use tracing::{debug, warn};

/// Rows changed (or that would change) for one duplicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StructuredUpdate {
    pub references: u64,
    pub index_entries: u64,
    /// Statements that failed; their rows are left for the next run
    pub failed: u32,
}

impl StructuredUpdate {
    pub fn total(&self) -> u64 {
        self.references + self.index_entries
    }
}

/// Repoints foreign keys and reference index rows from a duplicate to its
/// canonical record.
pub struct StructuredReferenceUpdater<'a> {
    repository: &'a dyn ConsolidationRepository,
}

impl<'a> StructuredReferenceUpdater<'a> {
    pub fn new(repository: &'a dyn ConsolidationRepository) -> Self {
        Self { repository }
    }

    /// Migrate both reference kinds. In a dry run only counts are taken. A
    /// live run skips the update for a kind whose count is zero.
    pub async fn apply(
        &self,
        duplicate: i64,
        canonical: i64,
        dry_run: bool,
        filter: Option<&FieldFilter>,
    ) -> StructuredUpdate {
        let mut update = StructuredUpdate::default();

        match self.migrate_references(duplicate, canonical, dry_run, filter).await {
            Ok(rows) => update.references = rows,
            Err(e) => {
                warn!("Failed to migrate references {} -> {}: {}", duplicate, canonical, e);
                update.failed += 1;
            }
        }

        match self.migrate_index(duplicate, canonical, dry_run, filter).await {
            Ok(rows) => update.index_entries = rows,
            Err(e) => {
                warn!("Failed to migrate index entries {} -> {}: {}", duplicate, canonical, e);
                update.failed += 1;
            }
        }

        update
    }

    async fn migrate_references(
        &self,
        duplicate: i64,
        canonical: i64,
        dry_run: bool,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let pending = self.repository.count_references(duplicate, filter).await?;
        if dry_run || pending == 0 {
            return Ok(pending);
        }

        let changed = self
            .repository
            .update_references(duplicate, canonical, filter)
            .await?;
        debug!("Repointed {} reference rows {} -> {}", changed, duplicate, canonical);
        Ok(changed)
    }

    async fn migrate_index(
        &self,
        duplicate: i64,
        canonical: i64,
        dry_run: bool,
        filter: Option<&FieldFilter>,
    ) -> Result<u64> {
        let pending = self.repository.count_index_entries(duplicate, filter).await?;
        if dry_run || pending == 0 {
            return Ok(pending);
        }

        let changed = self
            .repository
            .update_index_entries(duplicate, canonical, filter)
            .await?;
        debug!("Repointed {} index entries {} -> {}", changed, duplicate, canonical);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryConsolidationRepository, Mutation, Operation, RepositorySettings};

    fn repository() -> InMemoryConsolidationRepository {
        let repo = InMemoryConsolidationRepository::new(RepositorySettings::default());
        repo.add_asset(1, "aa", 10, "a.pdf");
        repo.add_asset(5, "aa", 10, "_migrated/a.pdf");
        repo.add_reference(5, "content", "image");
        repo.add_reference(5, "pages", "media");
        repo.add_index_entry("content", 3, "image", 5);
        repo.add_index_entry("asset_references", 40, "uid_local", 5);
        repo
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_writing() {
        let repo = repository();
        let update = StructuredReferenceUpdater::new(&repo).apply(5, 1, true, None).await;

        assert_eq!(update.references, 2);
        assert_eq!(update.index_entries, 1);
        assert_eq!(update.failed, 0);
        assert!(repo.mutations().is_empty());
        assert_eq!(repo.references_to(5), 2);
    }

    #[tokio::test]
    async fn test_live_run_repoints_and_keeps_bookkeeping() {
        let repo = repository();
        let update = StructuredReferenceUpdater::new(&repo).apply(5, 1, false, None).await;

        assert_eq!(update.total(), 3);
        assert_eq!(repo.references_to(5), 0);
        assert_eq!(repo.references_to(1), 2);
        // the asset_references bookkeeping row stays on the duplicate
        assert_eq!(repo.index_entries_to(5), 1);
        assert_eq!(repo.index_entries_to(1), 1);
    }

    #[tokio::test]
    async fn test_zero_count_emits_no_update() {
        let repo = repository();
        let update = StructuredReferenceUpdater::new(&repo).apply(1, 5, false, None).await;

        assert_eq!(update, StructuredUpdate::default());
        assert!(repo.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_filter_limits_rows() {
        let repo = repository();
        let filter = FieldFilter::new("pages", "media");
        let update = StructuredReferenceUpdater::new(&repo)
            .apply(5, 1, false, Some(&filter))
            .await;

        assert_eq!(update.references, 1);
        assert_eq!(update.index_entries, 0);
        assert_eq!(repo.references_to(5), 1);
        assert_eq!(
            repo.mutations(),
            vec![Mutation::UpdateReferences { from: 5, to: 1, rows: 1 }]
        );
    }

    #[tokio::test]
    async fn test_failures_are_counted_per_kind() {
        let repo = repository();
        repo.fail_on(Operation::UpdateIndexEntries);

        let update = StructuredReferenceUpdater::new(&repo).apply(5, 1, false, None).await;
        assert_eq!(update.references, 2);
        assert_eq!(update.index_entries, 0);
        assert_eq!(update.failed, 1);
    }
}
