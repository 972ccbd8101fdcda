use std::time::Duration;

/// Engine configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Hard per-worker deadline. A worker that outlives it is cancelled and
    /// the task marked FAILED.
    pub max_task_duration: Duration,
    /// Run the deterministic stage simulator instead of a real agent
    /// backend. Explicit configuration only.
    pub test_mode: bool,
    /// Sleep between simulated work steps.
    pub simulator_step_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_task_duration: Duration::from_secs(600),
            test_mode: false,
            simulator_step_delay: Duration::from_millis(200),
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_task_duration = std::env::var("MAX_TASK_DURATION_SECONDS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_task_duration);

        let test_mode = std::env::var("TEST_MODE")
            .ok()
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.test_mode);

        let simulator_step_delay = std::env::var("SIMULATOR_STEP_DELAY_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.simulator_step_delay);

        Self {
            max_task_duration,
            test_mode,
            simulator_step_delay,
        }
    }
}
