use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the health worker service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Counters surfaced to operators. Cheap to clone; a snapshot is taken
/// under the stats mutex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_runs_completed: u64,
    pub total_files_checked: u64,
    pub corrupted_detected: u64,
    pub repairs_triggered: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
}
