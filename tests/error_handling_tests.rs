mod test_helpers;

use asset_consolidation::repository::{Mutation, Operation};
use asset_consolidation::storage::content_digest;
use asset_consolidation::{ConsolidationError, ConsolidationMode, ProgressEvent, RunOptions};
use test_helpers::TestEnvironment;

/// Missing acknowledgment is refused before anything is touched
#[tokio::test]
async fn test_delete_without_acknowledgment() {
    let env = TestEnvironment::new();
    let mut consolidator = env.consolidator();

    let err = consolidator
        .delete_duplicates(ConsolidationMode::Internal, &RunOptions::live(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, ConsolidationError::Configuration(_)));
    assert!(err.to_string().contains("--yes-delete"));
    assert!(env.storage.deleted().is_empty());
    assert!(env.repository.mutations().is_empty());
}

#[tokio::test]
async fn test_permission_denied_aborts_remaining_batch() {
    let env = TestEnvironment::new();
    env.storage.deny("_migrated/report-2.pdf");
    let mut consolidator = env.consolidator();

    consolidator
        .consolidate(ConsolidationMode::Internal, &RunOptions::live())
        .await
        .unwrap();
    let err = consolidator
        .delete_duplicates(ConsolidationMode::Internal, &RunOptions::live(), true)
        .await
        .unwrap_err();

    match err {
        ConsolidationError::DeletionAborted {
            location,
            deleted,
            bytes_freed,
        } => {
            assert_eq!(location, "_migrated/report-2.pdf");
            assert_eq!(deleted, 1);
            assert_eq!(bytes_freed, 100);
        }
        other => panic!("expected DeletionAborted, got {other:?}"),
    }

    assert_eq!(env.storage.deleted(), vec!["_migrated/copy/logo.png".to_string()]);
    assert!(env.repository.has_asset(13));
    assert!(env
        .progress
        .events()
        .iter()
        .any(|e| matches!(e, ProgressEvent::DeletionFailed { asset_id: 13, .. })));
}

/// A reference added after the map was built keeps the duplicate alive
#[tokio::test]
async fn test_late_reference_blocks_deletion() {
    let env = TestEnvironment::new();
    let mut consolidator = env.consolidator();

    consolidator
        .consolidate(ConsolidationMode::Internal, &RunOptions::live())
        .await
        .unwrap();
    env.repository.add_index_entry("pages", 4, "media", 13);

    let report = consolidator
        .delete_duplicates(ConsolidationMode::Internal, &RunOptions::live(), true)
        .await
        .unwrap();
    let deletion = report.deletion.unwrap();

    assert_eq!(deletion.skipped_in_use, vec![13]);
    assert_eq!(deletion.deleted, 1);
    assert!(env.repository.has_asset(13));
    assert!(!env.repository.has_asset(11));
}

#[tokio::test]
async fn test_listing_failure_degrades_to_empty_run() {
    let env = TestEnvironment::new();
    env.repository.fail_on(Operation::ListAssets);

    let report = env
        .consolidator()
        .consolidate(ConsolidationMode::Internal, &RunOptions::live())
        .await
        .unwrap();

    assert_eq!(report.mapping.staged, 0);
    assert_eq!(report.mapping.mapped, 0);
    assert!(env.repository.mutations().is_empty());
}

#[tokio::test]
async fn test_write_failures_are_counted_and_retried_next_run() {
    let env = TestEnvironment::new();
    env.repository.fail_on(Operation::UpdateReferences);

    let first = env
        .consolidator()
        .consolidate(ConsolidationMode::Internal, &RunOptions::live())
        .await
        .unwrap();
    assert_eq!(first.structured.unwrap().failed, 2);
    assert_eq!(env.repository.references_to(11), 1);

    env.repository.recover(Operation::UpdateReferences);
    let second = env
        .consolidator()
        .migrate_references(ConsolidationMode::Internal, &RunOptions::live())
        .await
        .unwrap();
    assert_eq!(second.structured.unwrap().references, 2);
    assert_eq!(env.repository.references_to(11), 0);
}

#[tokio::test]
async fn test_count_failure_keeps_every_candidate() {
    let env = TestEnvironment::new();
    let mut consolidator = env.consolidator();
    consolidator
        .consolidate(ConsolidationMode::Internal, &RunOptions::live())
        .await
        .unwrap();

    env.repository.fail_on(Operation::CountReferences);
    let report = consolidator
        .delete_duplicates(ConsolidationMode::Internal, &RunOptions::live(), true)
        .await
        .unwrap();

    let deletion = report.deletion.unwrap();
    assert_eq!(deletion.deleted, 0);
    assert_eq!(deletion.skipped_unverified, vec![11, 13]);
    assert!(!env
        .repository
        .mutations()
        .iter()
        .any(|m| matches!(m, Mutation::RemoveAsset { .. })));
}

#[tokio::test]
async fn test_content_verification_keeps_mismatched_copy() {
    let env = TestEnvironment::new();
    env.storage.put("_migrated/copy/logo.png", b"not the logo");
    env.storage.put("_migrated/report-2.pdf", b"report");
    // records carry placeholder hashes; only 13 is made to match
    env.repository
        .add_asset(13, &content_digest(b"report"), 300, "_migrated/report-2.pdf");
    env.repository
        .add_asset(12, &content_digest(b"report"), 300, "_migrated/report.pdf");

    let mut consolidator = env.consolidator().with_content_verification(true);
    consolidator
        .consolidate(ConsolidationMode::Internal, &RunOptions::live())
        .await
        .unwrap();
    let report = consolidator
        .delete_duplicates(ConsolidationMode::Internal, &RunOptions::live(), true)
        .await
        .unwrap();

    let deletion = report.deletion.unwrap();
    assert_eq!(deletion.skipped_unverified, vec![11]);
    assert_eq!(deletion.deleted, 1);
    assert_eq!(env.storage.deleted(), vec!["_migrated/report-2.pdf".to_string()]);
}
