#![allow(dead_code)]

use asset_consolidation::config::FieldConfig;
use asset_consolidation::error::{ConsolidationError, Result};
use asset_consolidation::{
    AssetStorage, ConfiguredSchema, Consolidator, InMemoryConsolidationRepository,
    RecordingProgress, RepositorySettings,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Storage double that records deletions and can refuse chosen locations.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    deleted: Mutex<Vec<String>>,
    denied: Mutex<HashSet<String>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
}

impl RecordingStorage {
    pub fn deny(&self, location: &str) {
        self.denied.lock().unwrap().insert(location.to_string());
    }

    pub fn put(&self, location: &str, bytes: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(location.to_string(), bytes.to_vec());
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetStorage for RecordingStorage {
    async fn open(&self, location: &str) -> Result<Vec<u8>> {
        self.contents
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| ConsolidationError::Storage {
                location: location.to_string(),
                reason: "not found".to_string(),
            })
    }

    async fn delete(&self, location: &str) -> Result<()> {
        if self.denied.lock().unwrap().contains(location) {
            return Err(ConsolidationError::PermissionDenied {
                location: location.to_string(),
            });
        }
        self.deleted.lock().unwrap().push(location.to_string());
        Ok(())
    }
}

/// A small asset population with every kind of reference.
///
/// | id | hash | size | location                |
/// |----|------|------|-------------------------|
/// | 1  | aaa  | 100  | user_upload/logo.png    |
/// | 2  | bbb  | 200  | user_upload/manual.pdf  |
/// | 10 | aaa  | 100  | _migrated/logo.png      |
/// | 11 | aaa  | 100  | _migrated/copy/logo.png |
/// | 12 | ccc  | 300  | _migrated/report.pdf    |
/// | 13 | ccc  | 300  | _migrated/report-2.pdf  |
/// | 14 | ddd  | 50   | _migrated/unique.txt    |
///
/// Internal mode maps {11: 10, 13: 12}; external mode maps {10: 1, 11: 1}
/// and leaves 12, 13 and 14 unmatched.
pub struct TestEnvironment {
    pub repository: Arc<InMemoryConsolidationRepository>,
    pub storage: Arc<RecordingStorage>,
    pub progress: Arc<RecordingProgress>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let repository = InMemoryConsolidationRepository::new(RepositorySettings::default());

        repository.add_asset(1, "aaa", 100, "user_upload/logo.png");
        repository.add_asset(2, "bbb", 200, "user_upload/manual.pdf");
        repository.add_asset(10, "aaa", 100, "_migrated/logo.png");
        repository.add_asset(11, "aaa", 100, "_migrated/copy/logo.png");
        repository.add_asset(12, "ccc", 300, "_migrated/report.pdf");
        repository.add_asset(13, "ccc", 300, "_migrated/report-2.pdf");
        repository.add_asset(14, "ddd", 50, "_migrated/unique.txt");

        repository.add_reference(10, "content", "image");
        repository.add_reference(11, "content", "image");
        repository.add_reference(13, "pages", "media");

        repository.add_index_entry("content", 7, "bodytext", 13);
        repository.add_index_entry("asset_references", 99, "uid_local", 11);

        repository.set_field(
            "content",
            "bodytext",
            7,
            "Intro <link file:13 _blank>report</link> and <link file:52>other</link>",
        );
        repository.set_field("content", "bodytext", 9, "&lt;link file:11&gt;logo&lt;/link&gt;");
        repository.set_field("content", "header_link", 8, "file:11");
        repository.set_field("pages", "url", 3, "file:13?download=1 and file:130");

        Self {
            repository: Arc::new(repository),
            storage: Arc::new(RecordingStorage::default()),
            progress: Arc::new(RecordingProgress::new()),
        }
    }

    pub fn consolidator(&self) -> Consolidator {
        let schema = ConfiguredSchema::from_config(&FieldConfig::default())
            .expect("default field configuration is valid");
        Consolidator::new(
            self.repository.clone(),
            self.storage.clone(),
            Arc::new(schema),
            self.progress.clone(),
        )
    }
}
