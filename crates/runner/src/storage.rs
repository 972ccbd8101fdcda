use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use db::{
    DBService,
    models::{
        agent_run::{AgentRun, AgentRunError, AgentRunStatus},
        artifact::{Artifact, ArtifactError},
        event_log::{EventLog, EventLogError},
        task::{Task, TaskError, TaskStatus},
    },
};

use crate::event::Event;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    AgentRun(#[from] AgentRunError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// The durable store as the engine sees it. Workers write through this
/// interface; the reference implementation is the relational [`SqlxStorage`].
///
/// Write failures are reported but must never abort a running task — the
/// in-memory pathway stays authoritative for live subscribers.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn insert_event(&self, event: &Event) -> Result<i64, StorageError>;

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        result_summary: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn start_agent_run(&self, task_id: Uuid, stage_name: &str) -> Result<i64, StorageError>;

    async fn update_agent_run_status(
        &self,
        run_id: i64,
        status: AgentRunStatus,
    ) -> Result<(), StorageError>;

    async fn finish_agent_run(
        &self,
        run_id: i64,
        status: AgentRunStatus,
        output_summary: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Close any agent runs for a task that are still open. Teardown safety
    /// net for cancelled and timed-out workers.
    async fn finish_open_agent_runs(
        &self,
        task_id: Uuid,
        status: AgentRunStatus,
    ) -> Result<(), StorageError>;

    async fn save_artifact(
        &self,
        task_id: Uuid,
        agent_role: &str,
        file_path: &str,
        content: &str,
    ) -> Result<(), StorageError>;

    async fn fetch_events(
        &self,
        task_id: Uuid,
        since_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<EventLog>, StorageError>;

    async fn fetch_task(&self, task_id: Uuid) -> Result<Option<Task>, StorageError>;
}

/// Reference [`Storage`] backed by the SQLite models.
pub struct SqlxStorage {
    db: DBService,
}

impl SqlxStorage {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Storage for SqlxStorage {
    async fn insert_event(&self, event: &Event) -> Result<i64, StorageError> {
        let payload = event.payload_value().to_string();
        let row = EventLog::create(
            &self.db.pool,
            event.task_id,
            event.event_id,
            event.kind(),
            event.stage_name.as_deref(),
            &payload,
        )
        .await?;
        Ok(row.id)
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        result_summary: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        Task::update_status(&self.db.pool, task_id, status, result_summary, error_message).await?;
        Ok(())
    }

    async fn start_agent_run(&self, task_id: Uuid, stage_name: &str) -> Result<i64, StorageError> {
        let run = AgentRun::create(&self.db.pool, task_id, stage_name).await?;
        Ok(run.id)
    }

    async fn update_agent_run_status(
        &self,
        run_id: i64,
        status: AgentRunStatus,
    ) -> Result<(), StorageError> {
        AgentRun::update_status(&self.db.pool, run_id, status).await?;
        Ok(())
    }

    async fn finish_agent_run(
        &self,
        run_id: i64,
        status: AgentRunStatus,
        output_summary: Option<&str>,
    ) -> Result<(), StorageError> {
        AgentRun::finish(&self.db.pool, run_id, status, output_summary).await?;
        Ok(())
    }

    async fn finish_open_agent_runs(
        &self,
        task_id: Uuid,
        status: AgentRunStatus,
    ) -> Result<(), StorageError> {
        AgentRun::finish_open_for_task(&self.db.pool, task_id, status).await?;
        Ok(())
    }

    async fn save_artifact(
        &self,
        task_id: Uuid,
        agent_role: &str,
        file_path: &str,
        content: &str,
    ) -> Result<(), StorageError> {
        Artifact::create(
            &self.db.pool,
            Uuid::new_v4(),
            task_id,
            agent_role,
            file_path,
            content,
        )
        .await?;
        Ok(())
    }

    async fn fetch_events(
        &self,
        task_id: Uuid,
        since_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<EventLog>, StorageError> {
        let events = EventLog::find_since(&self.db.pool, task_id, since_id, limit).await?;
        Ok(events)
    }

    async fn fetch_task(&self, task_id: Uuid) -> Result<Option<Task>, StorageError> {
        let task = Task::find_by_id(&self.db.pool, task_id).await?;
        Ok(task)
    }
}
