use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use db::models::task::TaskStatus;

use crate::{
    registry::{RunnerError, TaskRegistry},
    simulator::SimulatorPipeline,
    test_support::{RecordingStorage, fast_config, wait_until},
};

#[tokio::test]
async fn start_twice_fails_while_worker_is_live() {
    let registry = TaskRegistry::new(Arc::new(RecordingStorage::new()), fast_config());
    let task_id = Uuid::new_v4();

    registry.start(task_id, "prompt", Some(true)).unwrap();
    let err = registry.start(task_id, "prompt", Some(true)).unwrap_err();
    assert!(matches!(err, RunnerError::AlreadyRunning(id) if id == task_id));
}

#[tokio::test]
async fn start_after_worker_exit_replaces_the_session() {
    let registry = TaskRegistry::new(Arc::new(RecordingStorage::new()), fast_config());
    let task_id = Uuid::new_v4();

    registry.start(task_id, "prompt", Some(true)).unwrap();
    let finished = wait_until(Duration::from_secs(2), || {
        registry
            .state_snapshot(task_id)
            .map(|s| s.is_terminal())
            .unwrap_or(false)
            && registry.running_count() == 0
    })
    .await;
    assert!(finished);

    registry.start(task_id, "prompt", Some(true)).unwrap();
    let state = registry.state_snapshot(task_id).unwrap();
    assert!(!state.is_terminal());
}

#[tokio::test]
async fn start_without_backend_requires_test_mode() {
    let mut config = fast_config();
    config.test_mode = false;
    let registry = TaskRegistry::new(Arc::new(RecordingStorage::new()), config);

    let err = registry.start(Uuid::new_v4(), "prompt", None).unwrap_err();
    assert!(matches!(err, RunnerError::BackendUnavailable));
}

#[tokio::test]
async fn production_factory_is_used_outside_test_mode() {
    let mut config = fast_config();
    config.test_mode = false;
    let registry = TaskRegistry::new_with_pipeline(
        Arc::new(RecordingStorage::new()),
        config,
        Arc::new(SimulatorPipeline::new(Duration::from_millis(5))),
    );
    let task_id = Uuid::new_v4();

    registry.start(task_id, "prompt", None).unwrap();
    let finished = wait_until(Duration::from_secs(2), || {
        registry
            .state_snapshot(task_id)
            .map(|s| s.status == TaskStatus::Succeeded)
            .unwrap_or(false)
    })
    .await;
    assert!(finished);
}

#[tokio::test]
async fn stop_on_unknown_task_returns_false() {
    let registry = TaskRegistry::new(Arc::new(RecordingStorage::new()), fast_config());
    assert!(!registry.stop(Uuid::new_v4()));
}

#[tokio::test]
async fn snapshots_are_copies() {
    let registry = TaskRegistry::new(Arc::new(RecordingStorage::new()), fast_config());
    let task_id = Uuid::new_v4();
    registry.start(task_id, "prompt", Some(true)).unwrap();

    let mut snapshot = registry.state_snapshot(task_id).unwrap();
    snapshot.status = TaskStatus::Failed;
    snapshot.progress = 0.9;

    let fresh = registry.state_snapshot(task_id).unwrap();
    assert_ne!(fresh.status, TaskStatus::Failed);
}

#[tokio::test]
async fn events_since_filters_the_tail() {
    let registry = TaskRegistry::new(Arc::new(RecordingStorage::new()), fast_config());
    let task_id = Uuid::new_v4();
    registry.start(task_id, "prompt", Some(true)).unwrap();

    let finished = wait_until(Duration::from_secs(2), || {
        registry
            .state_snapshot(task_id)
            .map(|s| s.is_terminal())
            .unwrap_or(false)
    })
    .await;
    assert!(finished);

    let all = registry.events_since(task_id, None).unwrap();
    assert!(!all.is_empty());
    assert_eq!(all.first().unwrap().event_id, 1);

    let tail = registry.events_since(task_id, Some(2)).unwrap();
    assert_eq!(tail.len(), all.len() - 2);
    assert!(tail.iter().all(|e| e.event_id > 2));

    // Unknown task: the caller must fall back to the durable store.
    assert!(registry.events_since(Uuid::new_v4(), None).is_none());
}

#[tokio::test]
async fn running_count_tracks_live_workers() {
    let registry = TaskRegistry::new(Arc::new(RecordingStorage::new()), fast_config());
    assert_eq!(registry.running_count(), 0);

    let task_id = Uuid::new_v4();
    registry.start(task_id, "prompt", Some(true)).unwrap();
    assert_eq!(registry.running_count(), 1);

    let drained = wait_until(Duration::from_secs(2), || registry.running_count() == 0).await;
    assert!(drained);
}
