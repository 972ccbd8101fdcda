//! Task execution engine: per-task workers driving the staged agent
//! pipeline, live event fan-out, and the durable event log.

pub mod bus;
pub mod config;
pub mod event;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod simulator;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod bus_tests;
#[cfg(test)]
mod registry_tests;
#[cfg(test)]
pub(crate) mod test_support;

pub use bus::SubscriptionBus;
pub use config::RunnerConfig;
pub use event::{Event, EventKind, EventPayload, TaskResult, TaskState};
pub use pipeline::{FileArtifact, PipelineFactory, Stage, StageContext, StageError, StageOutput};
pub use protocol::{StreamFrame, close_code};
pub use registry::{RunnerError, TaskRegistry};
pub use simulator::SimulatorPipeline;
pub use storage::{SqlxStorage, Storage, StorageError};
pub use worker::EventEmitter;
