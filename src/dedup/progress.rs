//! Per-record progress events emitted while a workflow runs.

use crate::models::{ConsolidationMode, SyntaxKind};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    MappingBuilt {
        mode: ConsolidationMode,
        mapped: usize,
        unmatched: usize,
    },
    FieldRewritten {
        syntax: SyntaxKind,
        table: String,
        field: String,
        owner_id: i64,
        remapped: usize,
        dry_run: bool,
    },
    ReferencesMigrated {
        duplicate_id: i64,
        canonical_id: i64,
        references: u64,
        index_entries: u64,
        processed: usize,
        total: usize,
        dry_run: bool,
    },
    Deleted {
        asset_id: i64,
        location: String,
        bytes: i64,
        dry_run: bool,
    },
    DeletionSkipped {
        asset_id: i64,
        reason: String,
    },
    DeletionFailed {
        asset_id: i64,
        location: String,
        reason: String,
    },
}

/// Running percentage of entries processed, 0 when there is nothing to do.
pub fn percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    processed as f64 * 100.0 / total as f64
}

fn verb(dry_run: bool, live: &'static str, dry: &'static str) -> &'static str {
    if dry_run {
        dry
    } else {
        live
    }
}

/// Receives progress events in order.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::MappingBuilt {
                mode,
                mapped,
                unmatched,
            } => {
                info!(
                    "Mapped {} {} duplicates ({} staged assets without a counterpart)",
                    mapped, mode, unmatched
                );
            }
            ProgressEvent::FieldRewritten {
                syntax,
                table,
                field,
                owner_id,
                remapped,
                dry_run,
            } => {
                info!(
                    "{} {} {} reference(s) in {}.{} #{}",
                    verb(*dry_run, "Rewrote", "Would rewrite"),
                    remapped,
                    syntax,
                    table,
                    field,
                    owner_id
                );
            }
            ProgressEvent::ReferencesMigrated {
                duplicate_id,
                canonical_id,
                references,
                index_entries,
                processed,
                total,
                dry_run,
            } => {
                info!(
                    "[{:5.1}%] {} {} reference(s) and {} index entries {} -> {}",
                    percent(*processed, *total),
                    verb(*dry_run, "Moved", "Would move"),
                    references,
                    index_entries,
                    duplicate_id,
                    canonical_id
                );
            }
            ProgressEvent::Deleted {
                asset_id,
                location,
                bytes,
                dry_run,
            } => {
                info!(
                    "{} #{} {} ({} bytes)",
                    verb(*dry_run, "Deleted", "Would delete"),
                    asset_id,
                    location,
                    bytes
                );
            }
            ProgressEvent::DeletionSkipped { asset_id, reason } => {
                info!("Kept #{}: {}", asset_id, reason);
            }
            ProgressEvent::DeletionFailed {
                asset_id,
                location,
                reason,
            } => {
                warn!("Could not delete #{} {}: {}", asset_id, location, reason);
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(4, 4), 100.0);
    }

    #[test]
    fn test_recording_keeps_order() {
        let sink = RecordingProgress::new();
        sink.emit(&ProgressEvent::DeletionSkipped {
            asset_id: 3,
            reason: "2 live references".to_string(),
        });
        sink.emit(&ProgressEvent::MappingBuilt {
            mode: ConsolidationMode::Internal,
            mapped: 1,
            unmatched: 0,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProgressEvent::DeletionSkipped { asset_id: 3, .. }));
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = ProgressEvent::Deleted {
            asset_id: 9,
            location: "_migrated/x.pdf".to_string(),
            bytes: 42,
            dry_run: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "deleted");
        assert_eq!(json["bytes"], 42);
    }

    #[test]
    #[traced_test]
    fn test_tracing_progress_frames_dry_runs() {
        TracingProgress.emit(&ProgressEvent::Deleted {
            asset_id: 9,
            location: "_migrated/x.pdf".to_string(),
            bytes: 42,
            dry_run: true,
        });
        TracingProgress.emit(&ProgressEvent::FieldRewritten {
            syntax: SyntaxKind::Tagged,
            table: "content".to_string(),
            field: "bodytext".to_string(),
            owner_id: 3,
            remapped: 2,
            dry_run: false,
        });

        assert!(logs_contain("Would delete #9 _migrated/x.pdf (42 bytes)"));
        assert!(logs_contain("Rewrote 2 tagged reference(s) in content.bodytext #3"));
    }
}
