use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsolidationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query error: {message}")]
    Query { message: String },

    #[error("Storage error for {location}: {reason}")]
    Storage { location: String, reason: String },

    #[error("Not found in storage: {location}")]
    NotFound { location: String },

    #[error("Permission denied for {location}")]
    PermissionDenied { location: String },

    #[error("Deletion aborted at {location} after {deleted} deletions ({bytes_freed} bytes freed): permission denied")]
    DeletionAborted {
        location: String,
        deleted: usize,
        bytes_freed: u64,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

}

impl ConsolidationError {
    /// Read and write failures against the relational store. These degrade
    /// the run instead of aborting it.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            ConsolidationError::Database(_)
                | ConsolidationError::Query { .. }
                | ConsolidationError::InvalidIdentifier(_)
        )
    }

    /// Errors after which no further deletion can be expected to succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsolidationError::PermissionDenied { .. }
                | ConsolidationError::DeletionAborted { .. }
                | ConsolidationError::Configuration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsolidationError>;
