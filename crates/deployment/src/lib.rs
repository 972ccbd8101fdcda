use std::sync::Arc;

use anyhow::Error as AnyhowError;
use async_trait::async_trait;
use db::DBService;
use runner::{RunnerConfig, TaskRegistry};
use sqlx::Error as SqlxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

/// Everything a route handler needs: configuration, the database, and the
/// task registry. Implemented by the local single-process deployment;
/// alternative deployments plug in behind the same trait.
#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &RunnerConfig;

    fn db(&self) -> &DBService;

    fn registry(&self) -> &Arc<TaskRegistry>;
}
