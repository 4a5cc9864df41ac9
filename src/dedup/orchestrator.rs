use super::canonical::CanonicalIndex;
use super::deletion::{DeletionReport, SafeDeletionGate};
use super::duplicates::DuplicateMap;
use super::fields::{TextFieldUpdater, TextRewriteSummary};
use super::progress::{ProgressEvent, ProgressSink};
use super::savings::SavingsReport;
use super::structured::StructuredReferenceUpdater;
use crate::error::Result;
use crate::models::{AssetRecord, AssetScope, ConsolidationMode, FieldFilter, RunOptions, SyntaxKind};
use crate::repository::ConsolidationRepository;
use crate::schema::SchemaDiscovery;
use crate::storage::AssetStorage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSummary {
    pub mode: ConsolidationMode,
    pub staged: usize,
    /// Distinct hashes in the canonical index
    pub canonical_hashes: usize,
    pub mapped: usize,
    /// Staged ids with no counterpart in the index scope
    pub unmatched: Vec<i64>,
    /// Map carried over from an earlier workflow of this run
    pub reused: bool,
}

/// Aggregate of repointing structured references for every map entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StructuredSummary {
    pub entries: usize,
    pub references: u64,
    pub index_entries: u64,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub run_id: Uuid,
    pub mode: ConsolidationMode,
    pub dry_run: bool,
    pub restrict: Option<FieldFilter>,
    pub mapping: MappingSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bare: Option<TextRewriteSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagged: Option<TextRewriteSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<StructuredSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion: Option<DeletionReport>,
}

impl ConsolidationReport {
    fn new(
        run_id: Uuid,
        mode: ConsolidationMode,
        options: &RunOptions,
        mapping: MappingSummary,
    ) -> Self {
        Self {
            run_id,
            mode,
            dry_run: options.dry_run,
            restrict: options.restrict.clone(),
            mapping,
            bare: None,
            tagged: None,
            structured: None,
            deletion: None,
        }
    }
}

struct RunMapping {
    index: CanonicalIndex,
    map: DuplicateMap,
    staged: Vec<AssetRecord>,
}

/// Drives the consolidation workflows for one run.
///
/// The canonical index and duplicate map are built by the first workflow
/// and reused by later ones in the same mode, so `consolidate` followed by
/// `delete_duplicates` maps once.
pub struct Consolidator {
    repository: Arc<dyn ConsolidationRepository>,
    storage: Arc<dyn AssetStorage>,
    schema: Arc<dyn SchemaDiscovery>,
    progress: Arc<dyn ProgressSink>,
    verify_content: bool,
    mapping: Option<RunMapping>,
}

impl Consolidator {
    pub fn new(
        repository: Arc<dyn ConsolidationRepository>,
        storage: Arc<dyn AssetStorage>,
        schema: Arc<dyn SchemaDiscovery>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            repository,
            storage,
            schema,
            progress,
            verify_content: false,
            mapping: None,
        }
    }

    pub fn with_content_verification(mut self, enabled: bool) -> Self {
        self.verify_content = enabled;
        self
    }

    /// Current duplicate map, if one has been built.
    pub fn duplicate_map(&self) -> Option<&DuplicateMap> {
        self.mapping.as_ref().map(|m| &m.map)
    }

    /// Map, rewrite both text syntaxes, then repoint structured references.
    pub async fn consolidate(
        &mut self,
        mode: ConsolidationMode,
        options: &RunOptions,
    ) -> Result<ConsolidationReport> {
        let (run_id, span) = workflow_span("consolidate", mode, options);
        async move {
            let mapping = self.ensure_mapping(mode).await;
            let mut report = ConsolidationReport::new(run_id, mode, options, mapping);

            report.bare = Some(self.rewrite_text(SyntaxKind::Bare, options).await);
            report.tagged = Some(self.rewrite_text(SyntaxKind::Tagged, options).await);
            report.structured = Some(self.migrate_structured(options).await);

            log_report(&report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Map, then rewrite embedded references in text fields only.
    pub async fn update_fields(
        &mut self,
        mode: ConsolidationMode,
        options: &RunOptions,
    ) -> Result<ConsolidationReport> {
        let (run_id, span) = workflow_span("update_fields", mode, options);
        async move {
            let mapping = self.ensure_mapping(mode).await;
            let mut report = ConsolidationReport::new(run_id, mode, options, mapping);

            report.bare = Some(self.rewrite_text(SyntaxKind::Bare, options).await);
            report.tagged = Some(self.rewrite_text(SyntaxKind::Tagged, options).await);

            log_report(&report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Map, then repoint structured references only.
    pub async fn migrate_references(
        &mut self,
        mode: ConsolidationMode,
        options: &RunOptions,
    ) -> Result<ConsolidationReport> {
        let (run_id, span) = workflow_span("migrate_references", mode, options);
        async move {
            let mapping = self.ensure_mapping(mode).await;
            let mut report = ConsolidationReport::new(run_id, mode, options, mapping);

            report.structured = Some(self.migrate_structured(options).await);

            log_report(&report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Map, then delete every duplicate that nothing references any more.
    ///
    /// The restriction in `options` does not narrow deletion; a record is
    /// only removed when no reference of any kind points at it.
    pub async fn delete_duplicates(
        &mut self,
        mode: ConsolidationMode,
        options: &RunOptions,
        acknowledged: bool,
    ) -> Result<ConsolidationReport> {
        let (run_id, span) = workflow_span("delete_duplicates", mode, options);
        async move {
            let mapping = self.ensure_mapping(mode).await;
            let mut report = ConsolidationReport::new(run_id, mode, options, mapping);

            let deletion = match &self.mapping {
                Some(run) => {
                    SafeDeletionGate::new(
                        self.repository.as_ref(),
                        self.storage.as_ref(),
                        self.progress.as_ref(),
                    )
                    .with_content_verification(self.verify_content)
                    .run(&run.map, &run.staged, options.dry_run, acknowledged)
                    .await
                }
                None => Ok(DeletionReport {
                    dry_run: options.dry_run,
                    ..Default::default()
                }),
            };

            if !options.dry_run && acknowledged {
                // deleted rows leave the cached map stale
                self.mapping = None;
            }

            match deletion {
                Ok(deletion) => report.deletion = Some(deletion),
                Err(e) => return Err(e),
            }
            log_report(&report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Wasted space over the whole asset population.
    pub async fn savings(&self) -> Result<SavingsReport> {
        let records = self.repository.list_all_assets().await?;
        let report = SavingsReport::compute(&records);
        info!(
            "{} assets, {} duplicate groups wasting {} bytes; {} staged copies ({} bytes) are removable",
            report.assets,
            report.total.groups,
            report.total.bytes,
            report.staged.records,
            report.staged.bytes
        );
        Ok(report)
    }

    async fn ensure_mapping(&mut self, mode: ConsolidationMode) -> MappingSummary {
        if let Some(run) = &self.mapping {
            if run.map.mode() == mode && !run.map.is_empty() {
                debug!("Reusing {} duplicate map with {} entries", mode, run.map.len());
                return summarize(run, true);
            }
        }

        let staged = self.load_assets(AssetScope::Staged).await;
        let index = match mode.index_scope() {
            AssetScope::Staged => CanonicalIndex::from_records(AssetScope::Staged, &staged),
            AssetScope::Outside => {
                let outside = self.load_assets(AssetScope::Outside).await;
                CanonicalIndex::from_records(AssetScope::Outside, &outside)
            }
        };
        let map = DuplicateMap::build(mode, &staged, &index);

        self.progress.emit(&ProgressEvent::MappingBuilt {
            mode,
            mapped: map.len(),
            unmatched: map.unmatched().len(),
        });

        let run = RunMapping { index, map, staged };
        let summary = summarize(&run, false);
        self.mapping = Some(run);
        summary
    }

    async fn load_assets(&self, scope: AssetScope) -> Vec<AssetRecord> {
        match self.repository.list_assets(scope).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not list {:?} assets, continuing with none: {}", scope, e);
                Vec::new()
            }
        }
    }

    async fn rewrite_text(&self, syntax: SyntaxKind, options: &RunOptions) -> TextRewriteSummary {
        let mut summary = TextRewriteSummary::default();
        let Some(run) = &self.mapping else {
            return summary;
        };
        if run.map.is_empty() {
            return summary;
        }

        let fields = self
            .schema
            .reference_bearing_fields()
            .restricted(options.restrict.as_ref());
        let updater = TextFieldUpdater::new(self.repository.as_ref(), self.progress.as_ref(), syntax);

        for (table, field) in fields.pairs(syntax) {
            let pass = updater
                .update_field(&table, &field, &run.map, options.dry_run)
                .await;
            summary.absorb(&pass);
        }

        info!(
            "{} references: {} of {} rows {} across {} fields",
            syntax,
            summary.rows_changed,
            summary.rows_scanned,
            if options.dry_run { "would change" } else { "changed" },
            summary.fields_scanned
        );
        summary
    }

    async fn migrate_structured(&self, options: &RunOptions) -> StructuredSummary {
        let mut summary = StructuredSummary::default();
        let Some(run) = &self.mapping else {
            return summary;
        };

        let updater = StructuredReferenceUpdater::new(self.repository.as_ref());
        let total = run.map.len();

        for (processed, (duplicate, canonical)) in run.map.iter().enumerate() {
            let update = updater
                .apply(duplicate, canonical, options.dry_run, options.restrict.as_ref())
                .await;

            summary.entries += 1;
            summary.references += update.references;
            summary.index_entries += update.index_entries;
            summary.failed += update.failed;

            self.progress.emit(&ProgressEvent::ReferencesMigrated {
                duplicate_id: duplicate,
                canonical_id: canonical,
                references: update.references,
                index_entries: update.index_entries,
                processed: processed + 1,
                total,
                dry_run: options.dry_run,
            });
        }

        summary
    }
}

fn workflow_span(
    name: &'static str,
    mode: ConsolidationMode,
    options: &RunOptions,
) -> (Uuid, tracing::Span) {
    let run_id = Uuid::new_v4();
    let span = info_span!(
        "workflow",
        workflow = name,
        run_id = %run_id,
        mode = %mode,
        dry_run = options.dry_run
    );
    (run_id, span)
}

fn summarize(run: &RunMapping, reused: bool) -> MappingSummary {
    MappingSummary {
        mode: run.map.mode(),
        staged: run.staged.len(),
        canonical_hashes: run.index.len(),
        mapped: run.map.len(),
        unmatched: run.map.unmatched().to_vec(),
        reused,
    }
}

fn log_report(report: &ConsolidationReport) {
    let would = if report.dry_run { "would be " } else { "" };
    info!(
        "{} run: {} staged assets, {} duplicates mapped, {} unmatched",
        report.mode,
        report.mapping.staged,
        report.mapping.mapped,
        report.mapping.unmatched.len()
    );
    if let Some(structured) = &report.structured {
        info!(
            "{} references and {} index entries {}repointed ({} failures)",
            structured.references, structured.index_entries, would, structured.failed
        );
    }
    if let Some(deletion) = &report.deletion {
        info!(
            "{} duplicates {}deleted, {} bytes {}freed",
            deletion.deleted, would, deletion.bytes_freed, would
        );
    }
}
