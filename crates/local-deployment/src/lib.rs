use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use runner::{RunnerConfig, SqlxStorage, TaskRegistry};

/// Single-process deployment: SQLite-backed storage and an in-process task
/// registry.
#[derive(Clone)]
pub struct LocalDeployment {
    config: RunnerConfig,
    db: DBService,
    registry: Arc<TaskRegistry>,
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let config = RunnerConfig::from_env();
        let db = DBService::new().await?;
        let storage = Arc::new(SqlxStorage::new(db.clone()));
        let registry = TaskRegistry::new(storage, config.clone());

        tracing::debug!(
            test_mode = config.test_mode,
            max_task_duration_secs = config.max_task_duration.as_secs(),
            "local deployment ready"
        );

        Ok(Self {
            config,
            db,
            registry,
        })
    }

    fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }
}
