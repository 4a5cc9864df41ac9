use super::DependencyContainer;
use crate::dedup::{ConsolidationReport, Consolidator};
use crate::models::{ConsolidationMode, RunOptions};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Which workflow a consolidation command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    /// Rewrite text fields and repoint structured references
    Consolidate,
    UpdateFields,
    MigrateReferences,
    Delete { acknowledged: bool },
    /// Consolidate, then delete in the same run
    All { acknowledged: bool },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub struct DatabaseCommandHandler {
    container: Arc<DependencyContainer>,
}

impl DatabaseCommandHandler {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    pub async fn init_db(&self, json: bool) -> Result<()> {
        self.container.database_setup.ensure_schema().await?;

        let health = self.container.database_setup.health_check().await?;
        if json {
            print_json(&health)?;
        } else {
            info!("Database: {}", health.status_summary());
        }

        if !health.is_healthy() {
            return Err(anyhow::anyhow!(
                "Database not ready after setup: {}",
                health.issues.join(", ")
            ));
        }
        Ok(())
    }

    pub async fn stats(&self, json: bool) -> Result<()> {
        let report = self.container.consolidator().savings().await?;
        if json {
            print_json(&report)?;
        } else {
            info!(
                "Whole population: {} duplicate groups, {} redundant copies, {} bytes",
                report.total.groups, report.total.records, report.total.bytes
            );
            info!(
                "Staged ({} of {} assets): {} removable copies in {} groups, {} bytes",
                report.staged_assets,
                report.assets,
                report.staged.records,
                report.staged.groups,
                report.staged.bytes
            );
        }
        Ok(())
    }
}

pub struct ConsolidationCommandHandler {
    container: Arc<DependencyContainer>,
}

impl ConsolidationCommandHandler {
    pub fn new(container: Arc<DependencyContainer>) -> Self {
        Self { container }
    }

    pub async fn run(
        &self,
        workflow: Workflow,
        mode: ConsolidationMode,
        options: &RunOptions,
        json: bool,
    ) -> Result<()> {
        if options.dry_run {
            info!("Dry run: nothing will be written or deleted");
        }
        if let Some(filter) = &options.restrict {
            info!("Restricted to {}", filter);
        }

        let mut consolidator = self.container.consolidator();
        let reports = execute(&mut consolidator, workflow, mode, options).await?;

        if json {
            print_json(&reports)?;
        } else {
            for report in &reports {
                summarize(report);
            }
        }
        Ok(())
    }
}

/// Run one workflow, or the consolidate-then-delete chain, on a single
/// engine so the duplicate map is built once.
pub async fn execute(
    consolidator: &mut Consolidator,
    workflow: Workflow,
    mode: ConsolidationMode,
    options: &RunOptions,
) -> Result<Vec<ConsolidationReport>> {
    let reports = match workflow {
        Workflow::Consolidate => vec![consolidator.consolidate(mode, options).await?],
        Workflow::UpdateFields => vec![consolidator.update_fields(mode, options).await?],
        Workflow::MigrateReferences => vec![consolidator.migrate_references(mode, options).await?],
        Workflow::Delete { acknowledged } => {
            vec![consolidator.delete_duplicates(mode, options, acknowledged).await?]
        }
        Workflow::All { acknowledged } => {
            let consolidated = consolidator.consolidate(mode, options).await?;
            if options.dry_run || acknowledged {
                let deleted = consolidator
                    .delete_duplicates(mode, options, acknowledged)
                    .await?;
                vec![consolidated, deleted]
            } else {
                warn!("Skipping deletion: pass --yes-delete to remove unreferenced duplicates");
                vec![consolidated]
            }
        }
    };
    Ok(reports)
}

fn summarize(report: &ConsolidationReport) {
    let (done, would) = if report.dry_run {
        ("would be", "would ")
    } else {
        ("were", "")
    };

    info!(
        "[{}] {} mode: {} of {} staged assets are duplicates, {} have no counterpart",
        report.run_id,
        report.mode,
        report.mapping.mapped,
        report.mapping.staged,
        report.mapping.unmatched.len()
    );

    for (label, summary) in [("bare", &report.bare), ("tagged", &report.tagged)] {
        if let Some(summary) = summary {
            info!(
                "{} links: {} rows {} rewritten ({} ids) in {} fields; {} read and {} write failures",
                label,
                summary.rows_changed,
                done,
                summary.ids_remapped,
                summary.fields_scanned,
                summary.read_failures,
                summary.write_failures
            );
        }
    }

    if let Some(structured) = &report.structured {
        info!(
            "Structured: {} references and {} index entries {} moved across {} duplicates ({} failures)",
            structured.references,
            structured.index_entries,
            done,
            structured.entries,
            structured.failed
        );
    }

    if let Some(deletion) = &report.deletion {
        info!(
            "Deletion: {} of {} duplicates {} removed, {} bytes {}freed",
            deletion.deleted, deletion.candidates, done, deletion.bytes_freed, would
        );
        if !deletion.skipped_in_use.is_empty() {
            warn!("Still referenced, kept: {:?}", deletion.skipped_in_use);
        }
        if !deletion.skipped_unverified.is_empty() {
            warn!("Could not verify, kept: {:?}", deletion.skipped_unverified);
        }
        if !deletion.already_removed.is_empty() {
            info!(
                "Already gone from storage, records {} removed: {:?}",
                done, deletion.already_removed
            );
        }
        for failure in &deletion.failures {
            warn!(
                "Failed to delete #{} {}: {}",
                failure.asset_id, failure.location, failure.reason
            );
        }
    }
}
