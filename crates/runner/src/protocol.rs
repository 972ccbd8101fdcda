use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{Event, TaskState};

/// Close codes used by the push-stream session.
pub mod close_code {
    /// Task reached a terminal status; clean close.
    pub const NORMAL: u16 = 1000;
    /// Idle timeout or peer gone.
    pub const GOING_AWAY: u16 = 1001;
    /// The requested task does not exist.
    pub const TASK_NOT_FOUND: u16 = 4404;
}

/// Server→client frames of the push-stream protocol. Framing-agnostic: any
/// bidirectional text transport carries these as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamFrame {
    Connected { task_id: Uuid, message: String },
    Event(Event),
    State(TaskState),
    Error { message: String },
}

impl StreamFrame {
    pub fn connected(task_id: Uuid, message: impl Into<String>) -> Self {
        StreamFrame::Connected {
            task_id,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamFrame::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
