use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Closed set of event kinds emitted during task execution.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "event_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum EventKind {
    Log,
    Message,
    StageStart,
    StageComplete,
    Result,
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Log => write!(f, "LOG"),
            EventKind::Message => write!(f, "MESSAGE"),
            EventKind::StageStart => write!(f, "STAGE_START"),
            EventKind::StageComplete => write!(f, "STAGE_COMPLETE"),
            EventKind::Result => write!(f, "RESULT"),
            EventKind::Error => write!(f, "ERROR"),
        }
    }
}

/// One durable row per emitted event. `event_id` is the worker-assigned
/// per-task sequence (1, 2, ...); `id` is the table rowid.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EventLog {
    pub id: i64,
    pub task_id: Uuid,
    pub event_id: i64,
    pub event_kind: EventKind,
    pub stage_name: Option<String>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl EventLog {
    pub async fn create(
        pool: &SqlitePool,
        task_id: Uuid,
        event_id: i64,
        event_kind: EventKind,
        stage_name: Option<&str>,
        payload: &str,
    ) -> Result<Self, EventLogError> {
        let event = sqlx::query_as::<_, EventLog>(
            r#"
            INSERT INTO event_log (task_id, event_id, event_kind, stage_name, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(event_id)
        .bind(event_kind)
        .bind(stage_name)
        .bind(payload)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(event)
    }

    /// Events for a task in emission order, optionally after `since_id` and
    /// capped at `limit`.
    pub async fn find_since(
        pool: &SqlitePool,
        task_id: Uuid,
        since_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Self>, EventLogError> {
        let events = sqlx::query_as::<_, EventLog>(
            r#"
            SELECT * FROM event_log
            WHERE task_id = ?1 AND event_id > ?2
            ORDER BY event_id ASC
            LIMIT ?3
            "#,
        )
        .bind(task_id)
        .bind(since_id.unwrap_or(0))
        .bind(limit.unwrap_or(-1))
        .fetch_all(pool)
        .await?;

        Ok(events)
    }

    pub async fn count_for_task(pool: &SqlitePool, task_id: Uuid) -> Result<i64, EventLogError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM event_log WHERE task_id = ?1")
                .bind(task_id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }

    /// Parse the stored payload as generic JSON.
    pub fn payload_json(&self) -> Option<Value> {
        serde_json::from_str(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        task::{CreateTask, Task},
        test_utils::setup_test_pool,
    };

    async fn seed_task(pool: &SqlitePool) -> Uuid {
        let id = Uuid::new_v4();
        Task::create(
            pool,
            &CreateTask {
                title: None,
                input_prompt: "prompt".to_string(),
            },
            id,
        )
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn find_since_returns_events_in_emission_order() {
        let pool = setup_test_pool().await;
        let task_id = seed_task(&pool).await;

        for event_id in 1..=5 {
            EventLog::create(
                &pool,
                task_id,
                event_id,
                EventKind::Log,
                None,
                r#"{"message":"hello"}"#,
            )
            .await
            .unwrap();
        }

        let all = EventLog::find_since(&pool, task_id, None, None).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.event_id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        let tail = EventLog::find_since(&pool, task_id, Some(3), None)
            .await
            .unwrap();
        assert_eq!(tail.iter().map(|e| e.event_id).collect::<Vec<_>>(), vec![4, 5]);

        let capped = EventLog::find_since(&pool, task_id, None, Some(2))
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(EventLog::count_for_task(&pool, task_id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn deleting_task_cascades_to_events() {
        let pool = setup_test_pool().await;
        let task_id = seed_task(&pool).await;

        EventLog::create(&pool, task_id, 1, EventKind::Log, None, "{}")
            .await
            .unwrap();
        Task::delete(&pool, task_id).await.unwrap();

        assert_eq!(EventLog::count_for_task(&pool, task_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn payload_json_parses_stored_text() {
        let pool = setup_test_pool().await;
        let task_id = seed_task(&pool).await;

        let event = EventLog::create(
            &pool,
            task_id,
            1,
            EventKind::Message,
            Some("PM"),
            r#"{"message":"Writing PRD"}"#,
        )
        .await
        .unwrap();

        let json = event.payload_json().expect("valid json");
        assert_eq!(json["message"], "Writing PRD");
        assert_eq!(event.stage_name.as_deref(), Some("PM"));
    }
}
