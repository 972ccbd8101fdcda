use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AgentRunError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Agent run not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "agent_run_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum AgentRunStatus {
    Started,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One row per stage invocation within a task.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AgentRun {
    pub id: i64,
    pub task_id: Uuid,
    pub agent_name: String,
    pub status: AgentRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output_summary: Option<String>,
}

impl AgentRun {
    pub async fn create(
        pool: &SqlitePool,
        task_id: Uuid,
        agent_name: &str,
    ) -> Result<Self, AgentRunError> {
        let run = sqlx::query_as::<_, AgentRun>(
            r#"
            INSERT INTO agent_runs (task_id, agent_name, status, started_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(agent_name)
        .bind(AgentRunStatus::Started)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(run)
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: i64,
        status: AgentRunStatus,
    ) -> Result<(), AgentRunError> {
        let result = sqlx::query("UPDATE agent_runs SET status = ?2 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AgentRunError::NotFound);
        }
        Ok(())
    }

    /// Finalize a run: terminal status, `finished_at`, optional summary.
    pub async fn finish(
        pool: &SqlitePool,
        id: i64,
        status: AgentRunStatus,
        output_summary: Option<&str>,
    ) -> Result<(), AgentRunError> {
        let result = sqlx::query(
            r#"
            UPDATE agent_runs
            SET status = ?2, finished_at = ?3, output_summary = COALESCE(?4, output_summary)
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .bind(output_summary)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AgentRunError::NotFound);
        }
        Ok(())
    }

    /// Teardown safety net: close any runs still open for a task.
    pub async fn finish_open_for_task(
        pool: &SqlitePool,
        task_id: Uuid,
        status: AgentRunStatus,
    ) -> Result<u64, AgentRunError> {
        let result = sqlx::query(
            r#"
            UPDATE agent_runs
            SET status = ?2, finished_at = ?3
            WHERE task_id = ?1 AND status IN ('STARTED', 'RUNNING')
            "#,
        )
        .bind(task_id)
        .bind(status)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn find_by_task(
        pool: &SqlitePool,
        task_id: Uuid,
    ) -> Result<Vec<Self>, AgentRunError> {
        let runs = sqlx::query_as::<_, AgentRun>(
            r#"
            SELECT * FROM agent_runs
            WHERE task_id = ?1
            ORDER BY started_at ASC, id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;

        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        task::{CreateTask, Task},
        test_utils::setup_test_pool,
    };

    #[tokio::test]
    async fn lifecycle_started_running_completed() {
        let pool = setup_test_pool().await;
        let task_id = Uuid::new_v4();
        Task::create(
            &pool,
            &CreateTask {
                title: None,
                input_prompt: "prompt".to_string(),
            },
            task_id,
        )
        .await
        .unwrap();

        let run = AgentRun::create(&pool, task_id, "PM").await.unwrap();
        assert_eq!(run.status, AgentRunStatus::Started);
        assert!(run.finished_at.is_none());

        AgentRun::update_status(&pool, run.id, AgentRunStatus::Running)
            .await
            .unwrap();
        AgentRun::finish(&pool, run.id, AgentRunStatus::Completed, Some("PM completed"))
            .await
            .unwrap();

        let runs = AgentRun::find_by_task(&pool, task_id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, AgentRunStatus::Completed);
        assert!(runs[0].finished_at.is_some());
        assert_eq!(runs[0].output_summary.as_deref(), Some("PM completed"));
    }

    #[tokio::test]
    async fn finish_open_closes_only_unfinished_runs() {
        let pool = setup_test_pool().await;
        let task_id = Uuid::new_v4();
        Task::create(
            &pool,
            &CreateTask {
                title: None,
                input_prompt: "prompt".to_string(),
            },
            task_id,
        )
        .await
        .unwrap();

        let done = AgentRun::create(&pool, task_id, "PM").await.unwrap();
        AgentRun::finish(&pool, done.id, AgentRunStatus::Completed, None)
            .await
            .unwrap();
        AgentRun::create(&pool, task_id, "Architect").await.unwrap();

        let closed = AgentRun::finish_open_for_task(&pool, task_id, AgentRunStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(closed, 1);

        let runs = AgentRun::find_by_task(&pool, task_id).await.unwrap();
        assert_eq!(runs[0].status, AgentRunStatus::Completed);
        assert_eq!(runs[1].status, AgentRunStatus::Cancelled);
    }
}
