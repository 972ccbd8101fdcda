use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{artifact::Artifact, task::Task};
use deployment::Deployment;
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    /// Only the newest version of each file.
    pub latest: Option<bool>,
}

pub async fn list_task_artifacts(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ArtifactQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Artifact>>>, ApiError> {
    let pool = &deployment.db().pool;
    Task::find_by_id(pool, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task with id {task_id} not found")))?;

    let artifacts = if query.latest.unwrap_or(false) {
        Artifact::find_latest_by_task(pool, task_id).await?
    } else {
        Artifact::find_by_task(pool, task_id).await?
    };

    Ok(ResponseJson(ApiResponse::success(artifacts)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/api/tasks/{task_id}/artifacts", get(list_task_artifacts))
}
