use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A code file produced by a stage, with version tracking. Saving the same
/// `file_path` again for a task appends a new version instead of replacing
/// the previous one.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Artifact {
    pub id: Uuid,
    pub task_id: Uuid,
    pub agent_role: String,
    pub file_path: String,
    pub version: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub async fn create(
        pool: &SqlitePool,
        id: Uuid,
        task_id: Uuid,
        agent_role: &str,
        file_path: &str,
        content: &str,
    ) -> Result<Self, ArtifactError> {
        let artifact = sqlx::query_as::<_, Artifact>(
            r#"
            INSERT INTO artifacts (id, task_id, agent_role, file_path, version, content, created_at)
            VALUES (
                ?1, ?2, ?3, ?4,
                (SELECT COALESCE(MAX(version), 0) + 1 FROM artifacts
                 WHERE task_id = ?2 AND file_path = ?4),
                ?5, ?6
            )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(task_id)
        .bind(agent_role)
        .bind(file_path)
        .bind(content)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(artifact)
    }

    pub async fn find_by_task(
        pool: &SqlitePool,
        task_id: Uuid,
    ) -> Result<Vec<Self>, ArtifactError> {
        let artifacts = sqlx::query_as::<_, Artifact>(
            r#"
            SELECT * FROM artifacts
            WHERE task_id = ?1
            ORDER BY file_path ASC, version ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;

        Ok(artifacts)
    }

    /// Latest version of every file for a task.
    pub async fn find_latest_by_task(
        pool: &SqlitePool,
        task_id: Uuid,
    ) -> Result<Vec<Self>, ArtifactError> {
        let artifacts = sqlx::query_as::<_, Artifact>(
            r#"
            SELECT a.* FROM artifacts a
            JOIN (
                SELECT file_path, MAX(version) AS version FROM artifacts
                WHERE task_id = ?1
                GROUP BY file_path
            ) latest
            ON a.file_path = latest.file_path AND a.version = latest.version
            WHERE a.task_id = ?1
            ORDER BY a.file_path ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;

        Ok(artifacts)
    }
}
