use super::duplicates::DuplicateMap;
use super::links::TextReferenceRewriter;
use super::progress::{ProgressEvent, ProgressSink};
use crate::models::{ReferenceRow, SyntaxKind};
use crate::repository::ConsolidationRepository;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Aggregate of text rewriting for one syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextRewriteSummary {
    pub fields_scanned: usize,
    pub rows_scanned: usize,
    /// Rows whose content changed (or would change)
    pub rows_changed: usize,
    /// Embedded ids remapped across all changed rows
    pub ids_remapped: usize,
    pub index_entries_retargeted: u64,
    pub read_failures: usize,
    pub write_failures: usize,
}

impl TextRewriteSummary {
    pub fn absorb(&mut self, other: &TextRewriteSummary) {
        self.fields_scanned += other.fields_scanned;
        self.rows_scanned += other.rows_scanned;
        self.rows_changed += other.rows_changed;
        self.ids_remapped += other.ids_remapped;
        self.index_entries_retargeted += other.index_entries_retargeted;
        self.read_failures += other.read_failures;
        self.write_failures += other.write_failures;
    }
}

/// Runs the rewriter over every stored row of one `(table, field)` pair.
pub struct TextFieldUpdater<'a> {
    repository: &'a dyn ConsolidationRepository,
    progress: &'a dyn ProgressSink,
    rewriter: TextReferenceRewriter,
}

impl<'a> TextFieldUpdater<'a> {
    pub fn new(
        repository: &'a dyn ConsolidationRepository,
        progress: &'a dyn ProgressSink,
        syntax: SyntaxKind,
    ) -> Self {
        Self {
            repository,
            progress,
            rewriter: TextReferenceRewriter::new(syntax),
        }
    }

    pub async fn update_field(
        &self,
        table: &str,
        field: &str,
        map: &DuplicateMap,
        dry_run: bool,
    ) -> TextRewriteSummary {
        let mut summary = TextRewriteSummary {
            fields_scanned: 1,
            ..Default::default()
        };
        let needle = self.rewriter.matcher().needle();

        let rows = match self.repository.fetch_field_rows(table, field, needle).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Could not read {}.{}: {}", table, field, e);
                summary.read_failures += 1;
                return summary;
            }
        };

        summary.rows_scanned = rows.len();
        debug!("Scanning {} rows of {}.{}", rows.len(), table, field);

        for row in &rows {
            self.update_row(row, map, dry_run, &mut summary).await;
        }

        if summary.rows_changed > 0 {
            info!(
                "{}.{}: {} {} row(s), {} id(s) remapped",
                table,
                field,
                if dry_run { "would update" } else { "updated" },
                summary.rows_changed,
                summary.ids_remapped
            );
        }

        summary
    }

    async fn update_row(
        &self,
        row: &ReferenceRow,
        map: &DuplicateMap,
        dry_run: bool,
        summary: &mut TextRewriteSummary,
    ) {
        let outcome = self.rewriter.rewrite(&row.raw_content, map);
        if !outcome.is_changed(&row.raw_content) {
            return;
        }

        if !dry_run {
            if let Err(e) = self.repository.update_field(row, &outcome.content).await {
                warn!(
                    "Failed to update {}.{} #{}: {}",
                    row.owner_table, row.field_name, row.owner_id, e
                );
                summary.write_failures += 1;
                return;
            }

            for (duplicate, canonical) in &outcome.pairs {
                match self
                    .repository
                    .retarget_owner_index(&row.owner_table, row.owner_id, *duplicate, *canonical)
                    .await
                {
                    Ok(rows) => summary.index_entries_retargeted += rows,
                    Err(e) => {
                        warn!(
                            "Failed to retarget index of {} #{} ({} -> {}): {}",
                            row.owner_table, row.owner_id, duplicate, canonical, e
                        );
                        summary.write_failures += 1;
                    }
                }
            }
        }

        summary.rows_changed += 1;
        summary.ids_remapped += outcome.remapped;

        self.progress.emit(&ProgressEvent::FieldRewritten {
            syntax: self.rewriter.matcher().kind(),
            table: row.owner_table.clone(),
            field: row.field_name.clone(),
            owner_id: row.owner_id,
            remapped: outcome.remapped,
            dry_run,
        });
    }
}
