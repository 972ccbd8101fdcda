use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    event::{EventPayload, TaskState},
    worker::EventEmitter,
};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),
}

/// A code file produced by a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct FileArtifact {
    pub file_path: String,
    pub content: String,
    pub language: Option<String>,
}

/// What a stage hands back to the worker.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Key under which the artifact appears in the final aggregate
    /// ("prd", "design", "code").
    pub artifact_label: String,
    /// The artifact text, fed to the next stage as its input.
    pub artifact: String,
    pub summary: String,
    pub execution_output: Option<String>,
    pub files: Vec<FileArtifact>,
}

/// Handed to a stage so it can emit events attributed to itself and keep the
/// task's last-message snapshot current.
pub struct StageContext<'a> {
    emitter: &'a EventEmitter,
    state: &'a Arc<Mutex<TaskState>>,
    stage_name: &'static str,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        emitter: &'a EventEmitter,
        state: &'a Arc<Mutex<TaskState>>,
        stage_name: &'static str,
    ) -> Self {
        Self {
            emitter,
            state,
            stage_name,
        }
    }

    pub fn stage_name(&self) -> &'static str {
        self.stage_name
    }

    /// Emit an event attributed to this stage.
    pub async fn emit(&self, body: EventPayload) {
        if let Some(message) = body.message_text() {
            self.state.lock().last_message = Some(message.to_string());
        }
        self.emitter.emit(Some(self.stage_name), body).await;
    }

    pub async fn emit_message(&self, message: impl Into<String>) {
        self.emit(EventPayload::message(message)).await;
    }

    pub async fn emit_file(&self, message: impl Into<String>, file: &FileArtifact) {
        self.emit(EventPayload::Message {
            message: message.into(),
            file_path: Some(file.file_path.clone()),
            content: Some(file.content.clone()),
            artifact_kind: Some("code".to_string()),
            language: file.language.clone(),
            execution_result: None,
        })
        .await;
    }

    pub async fn emit_execution(
        &self,
        message: impl Into<String>,
        execution_result: impl Into<String>,
    ) {
        self.emit(EventPayload::Message {
            message: message.into(),
            file_path: None,
            content: None,
            artifact_kind: None,
            language: None,
            execution_result: Some(execution_result.into()),
        })
        .await;
    }
}

/// One step of the pipeline. Implementations must yield between observable
/// actions (`ctx.emit*`, sleeps) so cancellation and the deadline can land.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, input: &str, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;
}

/// Builds the stage sequence a worker walks. The simulator implements this
/// for test mode; a production deployment plugs in an LLM-backed factory
/// through the same seam.
pub trait PipelineFactory: Send + Sync {
    fn build(&self) -> Vec<Box<dyn Stage>>;
}
