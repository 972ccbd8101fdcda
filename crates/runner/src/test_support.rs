use std::{
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::RunnerConfig;

/// Millisecond-scale config so engine tests finish quickly.
pub(crate) fn fast_config() -> RunnerConfig {
    RunnerConfig {
        max_task_duration: Duration::from_secs(5),
        test_mode: true,
        simulator_step_delay: Duration::from_millis(5),
    }
}

/// Poll `probe` every few milliseconds until it returns true or `deadline`
/// elapses.
pub(crate) async fn wait_until(deadline: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        if probe() {
            return true;
        }
        if started.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

use db::models::{
    agent_run::AgentRunStatus,
    event_log::EventLog,
    task::{Task, TaskError, TaskStatus},
};

use crate::{
    event::Event,
    storage::{Storage, StorageError},
};

#[derive(Debug, Clone)]
pub(crate) struct RecordedStatus {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRun {
    pub id: i64,
    pub task_id: Uuid,
    pub stage: String,
    pub status: AgentRunStatus,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedArtifact {
    pub task_id: Uuid,
    pub agent_role: String,
    pub file_path: String,
    pub content: String,
}

/// In-memory [`Storage`] double recording every call, with an optional
/// injected failure for the persistence-error path.
#[derive(Default)]
pub(crate) struct RecordingStorage {
    pub events: Mutex<Vec<Event>>,
    pub status_updates: Mutex<Vec<RecordedStatus>>,
    pub runs: Mutex<Vec<RecordedRun>>,
    pub artifacts: Mutex<Vec<RecordedArtifact>>,
    pub fail_event_inserts: AtomicBool,
    next_run_id: AtomicI64,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_status(&self, task_id: Uuid) -> Option<RecordedStatus> {
        self.status_updates
            .lock()
            .iter()
            .rev()
            .find(|s| s.task_id == task_id)
            .cloned()
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn insert_event(&self, event: &Event) -> Result<i64, StorageError> {
        if self.fail_event_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Task(TaskError::NotFound));
        }
        let mut events = self.events.lock();
        events.push(event.clone());
        Ok(events.len() as i64)
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        result_summary: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        self.status_updates.lock().push(RecordedStatus {
            task_id,
            status,
            result_summary: result_summary.map(str::to_string),
            error_message: error_message.map(str::to_string),
        });
        Ok(())
    }

    async fn start_agent_run(&self, task_id: Uuid, stage_name: &str) -> Result<i64, StorageError> {
        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.runs.lock().push(RecordedRun {
            id,
            task_id,
            stage: stage_name.to_string(),
            status: AgentRunStatus::Started,
            finished: false,
        });
        Ok(id)
    }

    async fn update_agent_run_status(
        &self,
        run_id: i64,
        status: AgentRunStatus,
    ) -> Result<(), StorageError> {
        if let Some(run) = self.runs.lock().iter_mut().find(|r| r.id == run_id) {
            run.status = status;
        }
        Ok(())
    }

    async fn finish_agent_run(
        &self,
        run_id: i64,
        status: AgentRunStatus,
        _output_summary: Option<&str>,
    ) -> Result<(), StorageError> {
        if let Some(run) = self.runs.lock().iter_mut().find(|r| r.id == run_id) {
            run.status = status;
            run.finished = true;
        }
        Ok(())
    }

    async fn finish_open_agent_runs(
        &self,
        task_id: Uuid,
        status: AgentRunStatus,
    ) -> Result<(), StorageError> {
        for run in self
            .runs
            .lock()
            .iter_mut()
            .filter(|r| r.task_id == task_id && !r.finished)
        {
            run.status = status;
            run.finished = true;
        }
        Ok(())
    }

    async fn save_artifact(
        &self,
        task_id: Uuid,
        agent_role: &str,
        file_path: &str,
        content: &str,
    ) -> Result<(), StorageError> {
        self.artifacts.lock().push(RecordedArtifact {
            task_id,
            agent_role: agent_role.to_string(),
            file_path: file_path.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn fetch_events(
        &self,
        task_id: Uuid,
        since_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<EventLog>, StorageError> {
        let since = since_id.unwrap_or(0);
        let mut rows: Vec<EventLog> = self
            .events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id && e.event_id > since)
            .enumerate()
            .map(|(i, e)| EventLog {
                id: i as i64 + 1,
                task_id: e.task_id,
                event_id: e.event_id,
                event_kind: e.kind(),
                stage_name: e.stage_name.clone(),
                payload: e.payload_value().to_string(),
                created_at: e.timestamp,
            })
            .collect();
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn fetch_task(&self, _task_id: Uuid) -> Result<Option<Task>, StorageError> {
        Ok(None)
    }
}
