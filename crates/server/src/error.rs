use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{
    agent_run::AgentRunError, artifact::ArtifactError, event_log::EventLogError, task::TaskError,
};
use deployment::DeploymentError;
use runner::{RunnerError, StorageError};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    AgentRun(#[from] AgentRunError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Task(TaskError::NotFound) => (StatusCode::NOT_FOUND, "TaskError"),
            ApiError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TaskError"),
            ApiError::EventLog(_) => (StatusCode::INTERNAL_SERVER_ERROR, "EventLogError"),
            ApiError::AgentRun(AgentRunError::NotFound) => {
                (StatusCode::NOT_FOUND, "AgentRunError")
            }
            ApiError::AgentRun(_) => (StatusCode::INTERNAL_SERVER_ERROR, "AgentRunError"),
            ApiError::Artifact(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ArtifactError"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StorageError"),
            ApiError::Runner(RunnerError::AlreadyRunning(_)) => {
                (StatusCode::CONFLICT, "RunnerError")
            }
            ApiError::Runner(RunnerError::BackendUnavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RunnerError")
            }
            ApiError::Deployment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DeploymentError"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            ApiError::Task(TaskError::NotFound) => "Task not found".to_string(),
            ApiError::AgentRun(AgentRunError::NotFound) => "Agent run not found".to_string(),
            ApiError::Runner(err) => err.to_string(),
            _ => format!("{}: {}", error_type, self),
        };

        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
