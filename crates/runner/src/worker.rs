use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use db::models::{agent_run::AgentRunStatus, task::TaskStatus};

use crate::{
    bus::SubscriptionBus,
    event::{Event, EventPayload, TaskResult, TaskState},
    pipeline::{Stage, StageContext, StageError},
    storage::Storage,
};

/// Single entrypoint for emitting a task's events. Assigns the per-task
/// sequence under the emission lock, appends the in-memory tail, attempts
/// the durable write, then fans out to live subscribers.
pub struct EventEmitter {
    task_id: Uuid,
    seq: tokio::sync::Mutex<i64>,
    tail: Arc<Mutex<Vec<Event>>>,
    bus: Arc<SubscriptionBus>,
    storage: Arc<dyn Storage>,
}

impl EventEmitter {
    pub(crate) fn new(
        task_id: Uuid,
        tail: Arc<Mutex<Vec<Event>>>,
        bus: Arc<SubscriptionBus>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            task_id,
            seq: tokio::sync::Mutex::new(0),
            tail,
            bus,
            storage,
        }
    }

    pub async fn emit(&self, stage_name: Option<&str>, body: EventPayload) -> Event {
        let mut seq = self.seq.lock().await;
        *seq += 1;

        let event = Event {
            event_id: *seq,
            task_id: self.task_id,
            timestamp: Utc::now(),
            stage_name: stage_name.map(str::to_string),
            body,
        };

        self.tail.lock().push(event.clone());

        // A failed durable write never aborts emission; the discrepancy is
        // visible later as an event-count mismatch.
        if let Err(e) = self.storage.insert_event(&event).await {
            tracing::error!(
                task_id = %self.task_id,
                event_id = event.event_id,
                "failed to persist event: {e}"
            );
        }

        self.bus.publish(&event);
        event
    }

    pub async fn last_event_id(&self) -> i64 {
        *self.seq.lock().await
    }
}

struct StageFailure {
    stage: &'static str,
    error: StageError,
}

enum Outcome {
    Succeeded(TaskResult),
    Failed(StageFailure),
    TimedOut,
    Cancelled,
}

/// Drives one task end to end on its own spawned task: walks the stage
/// pipeline, emits events, keeps the state snapshot current, and honors the
/// cancellation token and the hard deadline. Every exit path runs the same
/// finalization.
pub(crate) struct Worker {
    pub(crate) task_id: Uuid,
    pub(crate) requirement: String,
    pub(crate) state: Arc<Mutex<TaskState>>,
    pub(crate) emitter: Arc<EventEmitter>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) cancel: CancellationToken,
    pub(crate) max_duration: Duration,
    pub(crate) pipeline: Vec<Box<dyn Stage>>,
}

impl Worker {
    pub(crate) async fn run(self) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            res = timeout(self.max_duration, self.execute()) => match res {
                Ok(Ok(result)) => Outcome::Succeeded(result),
                Ok(Err(failure)) => Outcome::Failed(failure),
                Err(_) => Outcome::TimedOut,
            },
        };

        self.finalize(outcome).await;
    }

    async fn execute(&self) -> Result<TaskResult, StageFailure> {
        self.state.lock().set_status(TaskStatus::Running);
        if let Err(e) = self
            .storage
            .update_task_status(self.task_id, TaskStatus::Running, None, None)
            .await
        {
            tracing::warn!(task_id = %self.task_id, "failed to persist RUNNING status: {e}");
        }

        self.emitter
            .emit(
                None,
                EventPayload::log(format!(
                    "Starting task execution for requirement: {}",
                    truncate(&self.requirement, 100)
                )),
            )
            .await;

        let stage_names = self
            .pipeline
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(", ");
        self.emitter
            .emit(
                None,
                EventPayload::log(format!(
                    "Initialized {} stages: {}",
                    self.pipeline.len(),
                    stage_names
                )),
            )
            .await;

        let total = self.pipeline.len().max(1);
        let mut input = self.requirement.clone();
        let mut artifacts = BTreeMap::new();

        for stage in &self.pipeline {
            let name = stage.name();

            let run_id = match self.storage.start_agent_run(self.task_id, name).await {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!(task_id = %self.task_id, stage = name, "failed to record agent run: {e}");
                    None
                }
            };

            self.emitter
                .emit(
                    Some(name),
                    EventPayload::StageStart {
                        message: format!("{name} started working"),
                    },
                )
                .await;

            {
                let mut state = self.state.lock();
                state.current_stage = Some(name.to_string());
                state.last_message = Some(format!("{name} started working"));
            }

            if let Some(id) = run_id {
                if let Err(e) = self
                    .storage
                    .update_agent_run_status(id, AgentRunStatus::Running)
                    .await
                {
                    tracing::warn!(task_id = %self.task_id, stage = name, "failed to update agent run: {e}");
                }
            }

            let ctx = StageContext::new(&self.emitter, &self.state, name);
            let output = match stage.run(&input, &ctx).await {
                Ok(output) => output,
                Err(error) => {
                    if let Some(id) = run_id {
                        if let Err(e) = self
                            .storage
                            .finish_agent_run(id, AgentRunStatus::Failed, Some(&error.to_string()))
                            .await
                        {
                            tracing::warn!(task_id = %self.task_id, stage = name, "failed to finalize agent run: {e}");
                        }
                    }
                    return Err(StageFailure { stage: name, error });
                }
            };

            for file in &output.files {
                if let Err(e) = self
                    .storage
                    .save_artifact(self.task_id, name, &file.file_path, &file.content)
                    .await
                {
                    tracing::error!(
                        task_id = %self.task_id,
                        file_path = %file.file_path,
                        "failed to persist artifact: {e}"
                    );
                }
            }

            self.emitter
                .emit(
                    Some(name),
                    EventPayload::StageComplete {
                        message: format!("{name} completed"),
                        summary: Some(output.summary.clone()),
                    },
                )
                .await;

            if let Some(id) = run_id {
                if let Err(e) = self
                    .storage
                    .finish_agent_run(id, AgentRunStatus::Completed, Some(&output.summary))
                    .await
                {
                    tracing::warn!(task_id = %self.task_id, stage = name, "failed to finalize agent run: {e}");
                }
            }

            {
                let mut state = self.state.lock();
                state.advance_progress(1.0 / total as f32);
                state.last_message = Some(format!("{name} completed"));
            }

            artifacts.insert(output.artifact_label, output.artifact.clone());
            input = output.artifact;
        }

        Ok(TaskResult {
            requirement: self.requirement.clone(),
            artifacts,
        })
    }

    async fn finalize(&self, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded(result) => {
                self.emitter
                    .emit(
                        None,
                        EventPayload::Result {
                            result: result.clone(),
                        },
                    )
                    .await;

                {
                    let mut state = self.state.lock();
                    state.final_result = Some(result.clone());
                    state.set_status(TaskStatus::Succeeded);
                }

                let summary = serde_json::to_string(&result).ok();
                if let Err(e) = self
                    .storage
                    .update_task_status(self.task_id, TaskStatus::Succeeded, summary.as_deref(), None)
                    .await
                {
                    tracing::error!(task_id = %self.task_id, "failed to persist SUCCEEDED status: {e}");
                }

                tracing::info!(task_id = %self.task_id, "task succeeded");
            }
            Outcome::Failed(failure) => {
                let message = failure.error.to_string();
                self.emitter
                    .emit(
                        Some(failure.stage),
                        EventPayload::error(
                            message.clone(),
                            Some(format!("{} stage failed", failure.stage)),
                        ),
                    )
                    .await;

                {
                    let mut state = self.state.lock();
                    state.error_message = Some(message.clone());
                    state.current_stage = None;
                    state.set_status(TaskStatus::Failed);
                }

                self.persist_failure(TaskStatus::Failed, &message, AgentRunStatus::Failed)
                    .await;

                tracing::warn!(task_id = %self.task_id, stage = failure.stage, "task failed: {message}");
            }
            Outcome::TimedOut => {
                let message = format!(
                    "Task exceeded maximum duration of {} seconds",
                    self.max_duration.as_secs()
                );
                self.emitter
                    .emit(None, EventPayload::error(message.clone(), None))
                    .await;

                {
                    let mut state = self.state.lock();
                    state.error_message = Some(message.clone());
                    state.set_status(TaskStatus::Failed);
                }

                self.persist_failure(TaskStatus::Failed, &message, AgentRunStatus::Failed)
                    .await;

                tracing::warn!(task_id = %self.task_id, "task timed out: {message}");
            }
            Outcome::Cancelled => {
                let message = "cancelled".to_string();
                self.emitter
                    .emit(None, EventPayload::error(message.clone(), None))
                    .await;

                {
                    let mut state = self.state.lock();
                    state.error_message = Some(message.clone());
                    state.set_status(TaskStatus::Cancelled);
                }

                self.persist_failure(TaskStatus::Cancelled, &message, AgentRunStatus::Cancelled)
                    .await;

                tracing::info!(task_id = %self.task_id, "task cancelled");
            }
        }
    }

    async fn persist_failure(
        &self,
        status: TaskStatus,
        error_message: &str,
        run_status: AgentRunStatus,
    ) {
        if let Err(e) = self
            .storage
            .update_task_status(self.task_id, status, None, Some(error_message))
            .await
        {
            tracing::error!(task_id = %self.task_id, "failed to persist {status} status: {e}");
        }
        if let Err(e) = self
            .storage
            .finish_open_agent_runs(self.task_id, run_status)
            .await
        {
            tracing::warn!(task_id = %self.task_id, "failed to finalize open agent runs: {e}");
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
