use crate::config::Config;
use crate::connection::create_pool;
use crate::database_setup::DatabaseSetup;
use crate::dedup::{Consolidator, ProgressSink, TracingProgress};
use crate::repository::{PostgresConsolidationRepository, RepositorySettings};
use crate::schema::ConfiguredSchema;
use crate::storage::LocalFileStorage;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Dependency injection container for the application
pub struct DependencyContainer {
    pub config: Config,
    pub repository: Arc<PostgresConsolidationRepository>,
    pub storage: Arc<LocalFileStorage>,
    pub schema: Arc<ConfiguredSchema>,
    pub database_setup: Arc<DatabaseSetup>,
}

impl DependencyContainer {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing dependency container...");

        let db_pool = Arc::new(
            create_pool(
                &config.database_url,
                config.operational.max_db_connections,
                config.operational.connection_timeout_seconds,
            )
            .await?,
        );

        let repository = Arc::new(
            PostgresConsolidationRepository::new(
                db_pool.clone(),
                RepositorySettings::from_config(&config),
            )
            .context("Invalid repository settings")?,
        );
        let storage = Arc::new(LocalFileStorage::new(config.storage.root.clone()));
        let schema = Arc::new(
            ConfiguredSchema::from_config(&config.fields).context("Invalid field configuration")?,
        );
        let database_setup = Arc::new(DatabaseSetup::new(
            db_pool,
            config.reference_index.asset_table.clone(),
        ));

        info!(
            "Assets under {} (staging prefix {})",
            storage.root().display(),
            config.storage.staging_prefix
        );

        Ok(Self {
            config,
            repository,
            storage,
            schema,
            database_setup,
        })
    }

    /// A fresh engine for one run, logging progress through tracing.
    pub fn consolidator(&self) -> Consolidator {
        let progress: Arc<dyn ProgressSink> = Arc::new(TracingProgress);
        Consolidator::new(
            self.repository.clone(),
            self.storage.clone(),
            self.schema.clone(),
            progress,
        )
        .with_content_verification(self.config.storage.verify_content_before_delete)
    }
}
