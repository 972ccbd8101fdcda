//! Prometheus metrics for the task engine.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    /// Total number of tasks created through the API
    pub static ref TASKS_CREATED_TOTAL: IntCounter = register_int_counter!(
        "atelier_tasks_created_total",
        "Total number of tasks created"
    )
    .unwrap();

    /// Terminal task statuses observed by the stream sessions
    pub static ref TASKS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atelier_tasks_finished_total",
        "Total number of tasks that reached a terminal status",
        &["status"]
    )
    .unwrap();

    /// Total number of push-stream sessions opened
    pub static ref STREAM_SESSIONS_TOTAL: IntCounter = register_int_counter!(
        "atelier_stream_sessions_total",
        "Total number of push-stream sessions opened"
    )
    .unwrap();

    /// Number of live task workers
    pub static ref RUNNING_WORKERS: IntGauge = register_int_gauge!(
        "atelier_running_workers",
        "Number of live task workers"
    )
    .unwrap();
}

/// Export all metrics in Prometheus text format.
pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
