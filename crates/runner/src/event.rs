use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

pub use db::models::event_log::EventKind;
use db::models::task::TaskStatus;

/// Kind-specific event payloads.
///
/// Adjacently tagged so that a flattened [`Event`] serializes to the wire
/// shape `{..., "kind": "MESSAGE", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    Log {
        message: String,
    },
    Message {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// `"code"` for file artifacts.
        #[serde(rename = "kind", skip_serializing_if = "Option::is_none")]
        artifact_kind: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_result: Option<String>,
    },
    StageStart {
        message: String,
    },
    StageComplete {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Result {
        result: TaskResult,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Log { .. } => EventKind::Log,
            EventPayload::Message { .. } => EventKind::Message,
            EventPayload::StageStart { .. } => EventKind::StageStart,
            EventPayload::StageComplete { .. } => EventKind::StageComplete,
            EventPayload::Result { .. } => EventKind::Result,
            EventPayload::Error { .. } => EventKind::Error,
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        EventPayload::Log {
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        EventPayload::Message {
            message: message.into(),
            file_path: None,
            content: None,
            artifact_kind: None,
            language: None,
            execution_result: None,
        }
    }

    pub fn error(message: impl Into<String>, detail: Option<String>) -> Self {
        EventPayload::Error {
            message: message.into(),
            detail,
        }
    }

    /// The human-readable message carried by the payload, if any.
    pub fn message_text(&self) -> Option<&str> {
        match self {
            EventPayload::Log { message }
            | EventPayload::Message { message, .. }
            | EventPayload::StageStart { message }
            | EventPayload::StageComplete { message, .. }
            | EventPayload::Error { message, .. } => Some(message),
            EventPayload::Result { .. } => None,
        }
    }
}

/// Immutable unit of observation emitted by a worker. `event_id` starts at 1
/// and is strictly monotonic per task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: i64,
    pub task_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub stage_name: Option<String>,
    #[serde(flatten)]
    pub body: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    /// Just the payload object, as persisted in the durable log (the kind is
    /// stored in its own column).
    pub fn payload_value(&self) -> Value {
        match serde_json::to_value(&self.body) {
            Ok(Value::Object(mut map)) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Rebuild the wire event from a durable log row, so replayed events look
    /// exactly like live ones. `None` when the stored payload does not parse.
    pub fn from_log(row: &db::models::event_log::EventLog) -> Option<Self> {
        let payload: Value = serde_json::from_str(&row.payload).ok()?;
        let body: EventPayload = serde_json::from_value(serde_json::json!({
            "kind": row.event_kind,
            "payload": payload,
        }))
        .ok()?;

        Some(Event {
            event_id: row.event_id,
            task_id: row.task_id,
            timestamp: row.created_at,
            stage_name: row.stage_name.clone(),
            body,
        })
    }
}

/// Aggregate produced by a successful run: one artifact per stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct TaskResult {
    pub requirement: String,
    pub artifacts: BTreeMap<String, String>,
}

/// In-memory snapshot of a running task. Mutated only by the worker; every
/// reader gets a copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct TaskState {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub progress: f32,
    pub current_stage: Option<String>,
    pub last_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub final_result: Option<TaskResult>,
}

impl TaskState {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            progress: 0.0,
            current_stage: None,
            last_message: None,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            final_result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition the status. Terminal states are absorbing; SUCCEEDED snaps
    /// progress to 1.0, FAILED/CANCELLED keep the last fractional value.
    pub fn set_status(&mut self, status: TaskStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
            if status == TaskStatus::Succeeded {
                self.progress = 1.0;
            }
        }
    }

    /// Advance progress; never decreases and never exceeds 1.0.
    pub fn advance_progress(&mut self, delta: f32) {
        let next = (self.progress + delta).clamp(0.0, 1.0);
        if next > self.progress {
            self.progress = next;
        }
    }
}
