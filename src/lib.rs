pub mod application;
pub mod config;
pub mod connection;
pub mod database_setup;
pub mod dedup;
pub mod error;
pub mod models;
pub mod repository;
pub mod schema;
pub mod storage;

pub use config::Config;
pub use connection::create_pool;
pub use database_setup::{DatabaseHealth, DatabaseSetup};
pub use error::{ConsolidationError, Result};

// Re-export engine types for convenience
pub use dedup::{
    CanonicalIndex, ConsolidationReport, Consolidator, DeletionReport, DuplicateMap,
    ProgressEvent, ProgressSink, RecordingProgress, SafeDeletionGate, SavingsReport,
    StructuredReferenceUpdater, TextReferenceRewriter, TracingProgress,
};
pub use models::{AssetRecord, ConsolidationMode, FieldFilter, RunOptions, SyntaxKind};
pub use repository::{
    ConsolidationRepository, InMemoryConsolidationRepository, PostgresConsolidationRepository,
    RepositorySettings,
};
pub use schema::{ConfiguredSchema, SchemaDiscovery};
pub use storage::{AssetStorage, LocalFileStorage};
