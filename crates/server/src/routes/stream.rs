use std::time::Duration;

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::any,
};
use db::models::task::{Task, TaskStatus};
use deployment::Deployment;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use runner::{Event, RunnerError, StreamFrame, TaskRegistry, TaskState, close_code};
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval, timeout},
};
use uuid::Uuid;

use crate::{DeploymentImpl, metrics};

/// How often the session polls the state snapshot while no events arrive.
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Close the session after this long without any traffic in either direction.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// After a terminal status, keep forwarding queued events for this long.
const TERMINAL_DRAIN: Duration = Duration::from_millis(300);

pub async fn stream_task_ws(
    ws: WebSocketUpgrade,
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        metrics::STREAM_SESSIONS_TOTAL.inc();
        if let Err(e) = handle_task_stream(socket, deployment, task_id).await {
            tracing::warn!(%task_id, "task stream closed: {e}");
        }
    })
}

async fn handle_task_stream(
    mut socket: WebSocket,
    deployment: DeploymentImpl,
    task_id: Uuid,
) -> Result<(), axum::Error> {
    let registry = deployment.registry().clone();

    // The task must exist in the durable store before anything else.
    let task = match registry.storage().fetch_task(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            send_on(&mut socket, &StreamFrame::error(format!("Task {task_id} not found"))).await?;
            close_socket(&mut socket, close_code::TASK_NOT_FOUND, "Task not found").await;
            return Ok(());
        }
        Err(e) => {
            send_on(&mut socket, &StreamFrame::error(format!("Database error: {e}"))).await?;
            close_socket(&mut socket, close_code::GOING_AWAY, "Database error").await;
            return Ok(());
        }
    };

    // Subscribe before starting so the first events cannot be missed.
    let mut events = registry.subscribe(task_id);

    let snapshot = registry.state_snapshot(task_id);
    let needs_start = match &snapshot {
        None => !task.status.is_terminal(),
        Some(state) => state.status == TaskStatus::Pending,
    };

    let connected_message = if needs_start {
        match registry.start(task_id, &task.input_prompt, None) {
            Ok(()) => "Task started and connected to event stream",
            Err(RunnerError::AlreadyRunning(_)) => "Connected to existing task stream",
            Err(e) => {
                send_on(
                    &mut socket,
                    &StreamFrame::error(format!("Failed to start task: {e}")),
                )
                .await?;
                close_socket(&mut socket, close_code::GOING_AWAY, "Failed to start task").await;
                return Ok(());
            }
        }
    } else {
        "Connected to existing task stream"
    };

    send_on(&mut socket, &StreamFrame::connected(task_id, connected_message)).await?;

    // A task that finished in an earlier process lifetime has no live
    // session; report its stored outcome and close cleanly.
    if registry.state_snapshot(task_id).is_none() && task.status.is_terminal() {
        send_on(&mut socket, &StreamFrame::State(state_from_record(&task))).await?;
        close_socket(&mut socket, close_code::NORMAL, "Task completed").await;
        return Ok(());
    }

    let (mut sender, mut receiver) = socket.split();

    // Initial state frame.
    let mut last_state = registry.state_snapshot(task_id);
    if let Some(state) = &last_state {
        send_frame(&mut sender, &StreamFrame::State(state.clone())).await?;
    }

    let mut state_tick = interval(STATE_POLL_INTERVAL);
    state_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            maybe_event = events.recv() => match maybe_event {
                Some(event) => {
                    last_activity = Instant::now();
                    send_frame(&mut sender, &StreamFrame::Event(event)).await?;
                }
                None => {
                    // Worker torn down: everything buffered has been
                    // delivered, finish with one final state frame.
                    finish_terminal(&registry, task_id, &mut events, &mut sender).await?;
                    break;
                }
            },
            _ = state_tick.tick() => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    tracing::debug!(%task_id, "stream idle timeout");
                    close_sender(&mut sender, close_code::GOING_AWAY, "Idle timeout").await;
                    break;
                }

                let Some(state) = registry.state_snapshot(task_id) else {
                    continue;
                };

                if state.is_terminal() {
                    finish_terminal(&registry, task_id, &mut events, &mut sender).await?;
                    break;
                }

                if state_changed(last_state.as_ref(), &state) {
                    last_activity = Instant::now();
                    send_frame(&mut sender, &StreamFrame::State(state.clone())).await?;
                    last_state = Some(state);
                }
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(_)) => {
                    last_activity = Instant::now();
                }
                Some(Err(_)) | None => {
                    // Peer gone; exit silently. The worker keeps running.
                    tracing::debug!(%task_id, "stream peer disconnected");
                    break;
                }
            },
        }
    }

    Ok(())
}

/// Drain queued events (bounded), then always send one final `state` frame
/// and close normally. Draining first keeps the guarantee that a subscriber
/// never sees a SUCCEEDED state ahead of its RESULT event.
async fn finish_terminal(
    registry: &TaskRegistry,
    task_id: Uuid,
    events: &mut mpsc::Receiver<Event>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    let deadline = Instant::now() + TERMINAL_DRAIN;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, events.recv()).await {
            Ok(Some(event)) => {
                send_frame(sender, &StreamFrame::Event(event)).await?;
            }
            Ok(None) | Err(_) => break,
        }
    }

    if let Some(state) = registry.state_snapshot(task_id) {
        let status = state.status.to_string();
        metrics::TASKS_FINISHED_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();
        send_frame(sender, &StreamFrame::State(state)).await?;
    }

    close_sender(sender, close_code::NORMAL, "Task completed").await;
    Ok(())
}

fn state_changed(previous: Option<&TaskState>, current: &TaskState) -> bool {
    match previous {
        None => true,
        Some(prev) => {
            prev.status != current.status
                || (current.progress - prev.progress).abs() > 0.01
                || prev.current_stage != current.current_stage
        }
    }
}

/// Terminal snapshot synthesized from the task record, for reconnects after
/// the registry lost the session (e.g. a process restart).
fn state_from_record(task: &Task) -> TaskState {
    TaskState {
        task_id: task.id,
        status: task.status,
        progress: if task.status == TaskStatus::Succeeded {
            1.0
        } else {
            0.0
        },
        current_stage: None,
        last_message: task.result_summary.clone(),
        started_at: task.created_at,
        completed_at: Some(task.updated_at),
        error_message: task.error_message.clone(),
        final_result: None,
    }
}

async fn send_on(socket: &mut WebSocket, frame: &StreamFrame) -> Result<(), axum::Error> {
    socket.send(Message::Text(frame.to_json().into())).await
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &StreamFrame,
) -> Result<(), axum::Error> {
    sender.send(Message::Text(frame.to_json().into())).await
}

async fn close_socket(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn close_sender(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/ws/tasks/{task_id}", any(stream_task_ws))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use db::models::task::{Task, TaskStatus};
    use runner::TaskState;
    use uuid::Uuid;

    use super::{state_changed, state_from_record};

    fn task(status: TaskStatus) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: None,
            input_prompt: "build a todo app".to_string(),
            status,
            result_summary: Some("done".to_string()),
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn state_changed_triggers_on_status_progress_and_stage() {
        let base = TaskState::new(Uuid::new_v4());
        assert!(state_changed(None, &base));
        assert!(!state_changed(Some(&base), &base.clone()));

        let mut progressed = base.clone();
        progressed.progress = 0.34;
        assert!(state_changed(Some(&base), &progressed));

        let mut staged = base.clone();
        staged.current_stage = Some("PM".to_string());
        assert!(state_changed(Some(&base), &staged));

        let mut wiggled = base.clone();
        wiggled.progress = 0.005;
        assert!(!state_changed(Some(&base), &wiggled));
    }

    #[test]
    fn synthesized_state_reflects_the_stored_outcome() {
        let record = task(TaskStatus::Succeeded);
        let state = state_from_record(&record);
        assert_eq!(state.status, TaskStatus::Succeeded);
        assert_eq!(state.progress, 1.0);
        assert!(state.completed_at.is_some());

        let failed = state_from_record(&task(TaskStatus::Failed));
        assert_eq!(failed.progress, 0.0);
    }
}
