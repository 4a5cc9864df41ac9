//! Physical storage of asset content.

use crate::error::{ConsolidationError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Opens and deletes stored objects by location.
#[async_trait]
pub trait AssetStorage: Send + Sync + std::fmt::Debug {
    async fn open(&self, location: &str) -> Result<Vec<u8>>;
    async fn delete(&self, location: &str) -> Result<()>;
}

/// SHA-256 of stored content, lowercase hex, as kept in `content_hash`.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Assets stored as plain files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a location below the root. Absolute locations and parent
    /// components are refused.
    fn resolve(&self, location: &str) -> Result<PathBuf> {
        let relative = Path::new(location);
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });

        if location.is_empty() || escapes {
            return Err(ConsolidationError::Storage {
                location: location.to_string(),
                reason: "location must be a relative path inside the storage root".to_string(),
            });
        }

        Ok(self.root.join(relative))
    }
}

fn map_io_error(location: &str, error: std::io::Error) -> ConsolidationError {
    match error.kind() {
        ErrorKind::PermissionDenied => ConsolidationError::PermissionDenied {
            location: location.to_string(),
        },
        ErrorKind::NotFound => ConsolidationError::NotFound {
            location: location.to_string(),
        },
        _ => ConsolidationError::Storage {
            location: location.to_string(),
            reason: error.to_string(),
        },
    }
}

#[async_trait]
impl AssetStorage for LocalFileStorage {
    async fn open(&self, location: &str) -> Result<Vec<u8>> {
        let path = self.resolve(location)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| map_io_error(location, e))
    }

    async fn delete(&self, location: &str) -> Result<()> {
        let path = self.resolve(location)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_io_error(location, e))?;

        debug!("Removed {}", path.display());
        Ok(())
    }
}
