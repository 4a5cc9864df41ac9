use super::duplicates::DuplicateMap;
use super::progress::{ProgressEvent, ProgressSink};
use crate::error::{ConsolidationError, Result};
use crate::models::AssetRecord;
use crate::repository::ConsolidationRepository;
use crate::storage::{content_digest, AssetStorage};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub asset_id: i64,
    pub location: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub dry_run: bool,
    pub candidates: usize,
    /// Deleted, or would be deleted in a dry run
    pub deleted: usize,
    pub bytes_freed: u64,
    /// Still referenced at gate time
    pub skipped_in_use: Vec<i64>,
    /// Reference count unavailable, no recorded size, or content mismatch
    pub skipped_unverified: Vec<i64>,
    /// Content already gone from storage; only the record was removed
    pub already_removed: Vec<i64>,
    pub failures: Vec<DeletionFailure>,
}

enum Verdict {
    Safe,
    Missing,
    InUse(u64),
    Unverified(String),
    Denied(String),
}

/// Removes duplicates that nothing references any more.
pub struct SafeDeletionGate<'a> {
    repository: &'a dyn ConsolidationRepository,
    storage: &'a dyn AssetStorage,
    progress: &'a dyn ProgressSink,
    verify_content: bool,
}

impl<'a> SafeDeletionGate<'a> {
    pub fn new(
        repository: &'a dyn ConsolidationRepository,
        storage: &'a dyn AssetStorage,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            repository,
            storage,
            progress,
            verify_content: false,
        }
    }

    /// Re-hash stored content before deleting and keep anything that does
    /// not match its recorded hash.
    pub fn with_content_verification(mut self, enabled: bool) -> Self {
        self.verify_content = enabled;
        self
    }

    /// Delete every mapped duplicate whose live reference count is zero.
    ///
    /// A live run without `acknowledged` is refused before anything is
    /// touched. A permission failure stops the batch and is returned as
    /// [`ConsolidationError::DeletionAborted`]; other storage failures are
    /// reported per record. A record whose content is already gone from
    /// storage only loses its row, so a run interrupted between the two
    /// steps is finished by the next one.
    pub async fn run(
        &self,
        map: &DuplicateMap,
        staged: &[AssetRecord],
        dry_run: bool,
        acknowledged: bool,
    ) -> Result<DeletionReport> {
        if !dry_run && !acknowledged {
            return Err(ConsolidationError::Configuration(
                "Deleting duplicates needs explicit acknowledgment (--yes-delete). \
                 Run update-fields and migrate-references first so nothing points at them."
                    .to_string(),
            ));
        }

        let records: HashMap<i64, &AssetRecord> =
            staged.iter().map(|record| (record.id, record)).collect();

        let mut report = DeletionReport {
            dry_run,
            ..Default::default()
        };

        for (duplicate, _canonical) in map.iter() {
            let Some(record) = records.get(&duplicate) else {
                continue;
            };
            report.candidates += 1;

            let mut missing = match self.evaluate(record).await {
                Verdict::Safe => false,
                Verdict::Missing => true,
                Verdict::InUse(count) => {
                    report.skipped_in_use.push(record.id);
                    self.progress.emit(&ProgressEvent::DeletionSkipped {
                        asset_id: record.id,
                        reason: format!("{count} live reference(s)"),
                    });
                    continue;
                }
                Verdict::Unverified(reason) => {
                    report.skipped_unverified.push(record.id);
                    self.progress.emit(&ProgressEvent::DeletionSkipped {
                        asset_id: record.id,
                        reason,
                    });
                    continue;
                }
                Verdict::Denied(reason) => {
                    self.record_failure(record, reason, &mut report);
                    return Err(Self::abort(record, &report));
                }
            };

            if !dry_run && !missing {
                match self.storage.delete(&record.location).await {
                    Ok(()) => {}
                    Err(ConsolidationError::NotFound { .. }) => missing = true,
                    Err(e) => {
                        let denied = matches!(e, ConsolidationError::PermissionDenied { .. });
                        self.record_failure(record, e.to_string(), &mut report);
                        if denied {
                            return Err(Self::abort(record, &report));
                        }
                        continue;
                    }
                }
            }

            if missing {
                self.forget_missing(record, dry_run, &mut report).await;
                continue;
            }

            if !dry_run {
                if let Err(e) = self.repository.remove_asset(record.id).await {
                    warn!(
                        "Removed {} from storage but not its record #{}: {}",
                        record.location, record.id, e
                    );
                }
            }

            report.deleted += 1;
            report.bytes_freed += record.size_bytes.max(0) as u64;
            self.progress.emit(&ProgressEvent::Deleted {
                asset_id: record.id,
                location: record.location.clone(),
                bytes: record.size_bytes,
                dry_run,
            });
        }

        info!(
            "{} {} of {} duplicates, {} bytes; {} still referenced, {} unverified, {} already gone, {} failed",
            if dry_run { "Would delete" } else { "Deleted" },
            report.deleted,
            report.candidates,
            report.bytes_freed,
            report.skipped_in_use.len(),
            report.skipped_unverified.len(),
            report.already_removed.len(),
            report.failures.len()
        );

        Ok(report)
    }

    /// Decide on one record using counts taken now, not when the map was built.
    async fn evaluate(&self, record: &AssetRecord) -> Verdict {
        if record.size_bytes <= 0 {
            return Verdict::Unverified("no recorded size".to_string());
        }

        let references = match self.repository.count_references(record.id, None).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Cannot count references to #{}: {}", record.id, e);
                return Verdict::Unverified(format!("reference count failed: {e}"));
            }
        };
        let index_entries = match self.repository.count_index_entries(record.id, None).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Cannot count index entries for #{}: {}", record.id, e);
                return Verdict::Unverified(format!("index count failed: {e}"));
            }
        };

        let live = references + index_entries;
        if live > 0 {
            return Verdict::InUse(live);
        }

        if self.verify_content {
            match self.storage.open(&record.location).await {
                Ok(bytes) => {
                    let digest = content_digest(&bytes);
                    if !digest.eq_ignore_ascii_case(&record.content_hash) {
                        return Verdict::Unverified(format!(
                            "stored content hashes to {digest}, record says {}",
                            record.content_hash
                        ));
                    }
                }
                Err(ConsolidationError::NotFound { .. }) => return Verdict::Missing,
                Err(e @ ConsolidationError::PermissionDenied { .. }) => {
                    return Verdict::Denied(e.to_string())
                }
                Err(e) => return Verdict::Unverified(format!("cannot open: {e}")),
            }
        }

        Verdict::Safe
    }

    fn record_failure(&self, record: &AssetRecord, reason: String, report: &mut DeletionReport) {
        let failure = DeletionFailure {
            asset_id: record.id,
            location: record.location.clone(),
            reason,
        };
        self.progress.emit(&ProgressEvent::DeletionFailed {
            asset_id: failure.asset_id,
            location: failure.location.clone(),
            reason: failure.reason.clone(),
        });
        report.failures.push(failure);
    }

    fn abort(record: &AssetRecord, report: &DeletionReport) -> ConsolidationError {
        error!(
            "Permission denied for {}, aborting remaining deletions",
            record.location
        );
        ConsolidationError::DeletionAborted {
            location: record.location.clone(),
            deleted: report.deleted,
            bytes_freed: report.bytes_freed,
        }
    }

    async fn forget_missing(
        &self,
        record: &AssetRecord,
        dry_run: bool,
        report: &mut DeletionReport,
    ) {
        warn!(
            "{} (#{}) is already gone from storage, {} its record",
            record.location,
            record.id,
            if dry_run { "would remove" } else { "removing" }
        );
        if !dry_run {
            if let Err(e) = self.repository.remove_asset(record.id).await {
                self.record_failure(record, format!("already gone, record kept: {e}"), report);
                return;
            }
        }
        report.already_removed.push(record.id);
    }
}
