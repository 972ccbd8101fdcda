use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    bus::SubscriptionBus,
    config::RunnerConfig,
    event::{Event, TaskState},
    pipeline::PipelineFactory,
    simulator::SimulatorPipeline,
    storage::Storage,
    worker::{EventEmitter, Worker},
};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Task {0} is already running")]
    AlreadyRunning(Uuid),
    #[error("no agent backend configured; set TEST_MODE=true to use the simulator")]
    BackendUnavailable,
}

struct TaskSession {
    state: Arc<Mutex<TaskState>>,
    tail: Arc<Mutex<Vec<Event>>>,
    cancel: CancellationToken,
    finished: bool,
}

/// Process-wide source of truth for running workers: lookup, cancellation,
/// state snapshots, and the in-memory event tail.
///
/// A session's state and tail are retained after its worker exits so late
/// observers can still read them; only the live handle is what blocks a
/// second `start`.
pub struct TaskRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, TaskSession>>>,
    bus: Arc<SubscriptionBus>,
    storage: Arc<dyn Storage>,
    config: RunnerConfig,
    production: Option<Arc<dyn PipelineFactory>>,
}

impl TaskRegistry {
    pub fn new(storage: Arc<dyn Storage>, config: RunnerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            bus: Arc::new(SubscriptionBus::new()),
            storage,
            config,
            production: None,
        })
    }

    /// Like [`TaskRegistry::new`] but with a production pipeline factory for
    /// non-test-mode starts.
    pub fn new_with_pipeline(
        storage: Arc<dyn Storage>,
        config: RunnerConfig,
        production: Arc<dyn PipelineFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            bus: Arc::new(SubscriptionBus::new()),
            storage,
            config,
            production: Some(production),
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The durable store this registry's workers write through.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Spawn a worker for a task. Fails while a previous worker for the same
    /// task is still live. `test_mode` overrides the configured default.
    pub fn start(
        &self,
        task_id: Uuid,
        requirement: &str,
        test_mode: Option<bool>,
    ) -> Result<(), RunnerError> {
        let test_mode = test_mode.unwrap_or(self.config.test_mode);
        let pipeline = if test_mode {
            SimulatorPipeline::new(self.config.simulator_step_delay).build()
        } else {
            match &self.production {
                Some(factory) => factory.build(),
                None => return Err(RunnerError::BackendUnavailable),
            }
        };

        let state = Arc::new(Mutex::new(TaskState::new(task_id)));
        let tail: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(&task_id) {
                if !existing.finished {
                    return Err(RunnerError::AlreadyRunning(task_id));
                }
            }
            // A finished session from an earlier run is replaced wholesale.
            sessions.insert(
                task_id,
                TaskSession {
                    state: state.clone(),
                    tail: tail.clone(),
                    cancel: cancel.clone(),
                    finished: false,
                },
            );
        }

        let emitter = Arc::new(EventEmitter::new(
            task_id,
            tail,
            self.bus.clone(),
            self.storage.clone(),
        ));

        let worker = Worker {
            task_id,
            requirement: requirement.to_string(),
            state,
            emitter,
            storage: self.storage.clone(),
            cancel,
            max_duration: self.config.max_task_duration,
            pipeline,
        };

        let sessions = self.sessions.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            worker.run().await;
            // Teardown: keep state and tail for late observers, clear the
            // live handle, close the task's subscriber channels.
            if let Some(session) = sessions.lock().get_mut(&task_id) {
                session.finished = true;
            }
            bus.remove_task(task_id);
        });

        tracing::info!(%task_id, test_mode, "started worker");
        Ok(())
    }

    /// Copy-out of the current state, also available after the worker exited.
    pub fn state_snapshot(&self, task_id: Uuid) -> Option<TaskState> {
        self.sessions
            .lock()
            .get(&task_id)
            .map(|session| session.state.lock().clone())
    }

    /// Events from the in-memory tail, optionally after `since_id`. `None`
    /// when the registry no longer knows the task; callers fall back to the
    /// durable store.
    pub fn events_since(&self, task_id: Uuid, since_id: Option<i64>) -> Option<Vec<Event>> {
        let since = since_id.unwrap_or(0);
        self.sessions.lock().get(&task_id).map(|session| {
            session
                .tail
                .lock()
                .iter()
                .filter(|event| event.event_id > since)
                .cloned()
                .collect()
        })
    }

    /// Signal cancellation to a running worker. Returns whether a worker was
    /// actually signalled; a stop on an absent or already-terminal task is a
    /// no-op returning false. Never blocks on worker exit.
    pub fn stop(&self, task_id: Uuid) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&task_id) {
            Some(session) if !session.finished && !session.state.lock().is_terminal() => {
                session.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Register a live event channel for a task (capacity
    /// [`crate::bus::SUBSCRIBER_CHANNEL_CAPACITY`]).
    pub fn subscribe(&self, task_id: Uuid) -> mpsc::Receiver<Event> {
        self.bus.subscribe(task_id)
    }

    pub fn running_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|session| !session.finished)
            .count()
    }
}
