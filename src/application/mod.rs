use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;

pub mod command_handlers;
pub mod dependency_container;

pub use command_handlers::{ConsolidationCommandHandler, DatabaseCommandHandler, Workflow};
pub use dependency_container::DependencyContainer;

/// Application layer - wires configuration to the consolidation engine
pub struct Application {
    pub container: Arc<DependencyContainer>,
}

impl Application {
    pub async fn new(config: Config) -> Result<Self> {
        let container = Arc::new(DependencyContainer::new(config).await?);
        Ok(Self { container })
    }
}
