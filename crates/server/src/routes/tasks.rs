use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    event_log::EventLog,
    task::{CreateTask, Task, TaskStatus, UpdateTask},
};
use deployment::Deployment;
use runner::{Event, TaskState};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, metrics};

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Serialize, TS)]
pub struct TaskListPage {
    pub items: Vec<Task>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub since_id: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn create_task(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateTask>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<Task>>), ApiError> {
    if payload.input_prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("input_prompt must not be empty".to_string()));
    }

    let id = Uuid::new_v4();
    let task = Task::create(&deployment.db().pool, &payload, id).await?;
    metrics::TASKS_CREATED_TOTAL.inc();

    tracing::debug!(task_id = %task.id, "created task");
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(task))))
}

pub async fn list_tasks(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<TaskListQuery>,
) -> Result<ResponseJson<ApiResponse<TaskListPage>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * page_size;

    let pool = &deployment.db().pool;
    let total = Task::count(pool, query.status).await?;
    let items = Task::list(pool, query.status, page_size, offset).await?;
    let total_pages = if total > 0 {
        (total + page_size - 1) / page_size
    } else {
        0
    };

    Ok(ResponseJson(ApiResponse::success(TaskListPage {
        items,
        total,
        page,
        page_size,
        total_pages,
    })))
}

pub async fn get_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = Task::find_by_id(&deployment.db().pool, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task with id {task_id} not found")))?;

    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn update_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<UpdateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = Task::update(&deployment.db().pool, task_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn delete_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<StatusCode, ApiError> {
    Task::delete(&deployment.db().pool, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Kick off execution for a task that exists in the store. The worker moves
/// the record to RUNNING itself.
pub async fn start_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let task = Task::find_by_id(&deployment.db().pool, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task with id {task_id} not found")))?;

    deployment
        .registry()
        .start(task.id, &task.input_prompt, None)?;

    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn stop_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<bool>>, ApiError> {
    let stopped = deployment.registry().stop(task_id);
    if !stopped {
        return Err(ApiError::NotFound(format!(
            "Task {task_id} not found or cannot be stopped"
        )));
    }

    Ok(ResponseJson(ApiResponse::success(true)))
}

pub async fn get_task_state(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<TaskState>>, ApiError> {
    let state = deployment
        .registry()
        .state_snapshot(task_id)
        .ok_or_else(|| ApiError::NotFound(format!("Task {task_id} not found or not started")))?;

    Ok(ResponseJson(ApiResponse::success(state)))
}

/// Pull path for reconciliation. With `since_id` the durable log is
/// authoritative; without it the registry's in-memory tail is preferred and
/// the log is the fallback once the registry no longer knows the task.
pub async fn get_task_events(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<EventQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Event>>>, ApiError> {
    if query.since_id.is_none() {
        if let Some(mut events) = deployment.registry().events_since(task_id, None) {
            if let Some(limit) = query.limit {
                events.truncate(limit.max(0) as usize);
            }
            return Ok(ResponseJson(ApiResponse::success(events)));
        }
    }

    let rows = EventLog::find_since(
        &deployment.db().pool,
        task_id,
        query.since_id,
        query.limit,
    )
    .await?;
    let events = rows.iter().filter_map(Event::from_log).collect();

    Ok(ResponseJson(ApiResponse::success(events)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{task_id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{task_id}/start", post(start_task))
        .route("/api/tasks/{task_id}/stop", post(stop_task))
        .route("/api/tasks/{task_id}/state", get(get_task_state))
        .route("/api/tasks/{task_id}/events", get(get_task_events))
}
