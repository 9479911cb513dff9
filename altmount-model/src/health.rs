use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dispatch priorities for health rows. Higher values are selected first
/// within the same due window.
pub mod priority {
    /// Routine scheduled re-checks.
    pub const SCHEDULED: i64 = 0;
    /// Rows freshly created by the import pipeline.
    pub const IMPORT: i64 = 10;
    /// Operator-requested re-queues.
    pub const MANUAL: i64 = 100;
}

/// Lifecycle state of a tracked file's health row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Pending,
    Checking,
    Healthy,
    Corrupted,
    RepairTriggered,
}

impl HealthStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Checking => "checking",
            Self::Healthy => "healthy",
            Self::Corrupted => "corrupted",
            Self::RepairTriggered => "repair_triggered",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHealthStatusError {
    invalid_value: String,
}

impl fmt::Display for ParseHealthStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid health status: {}", self.invalid_value)
    }
}

impl std::error::Error for ParseHealthStatusError {}

impl FromStr for HealthStatus {
    type Err = ParseHealthStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "checking" => Ok(Self::Checking),
            "healthy" => Ok(Self::Healthy),
            "corrupted" => Ok(Self::Corrupted),
            "repair_triggered" => Ok(Self::RepairTriggered),
            other => Err(ParseHealthStatusError {
                invalid_value: other.to_string(),
            }),
        }
    }
}

/// One row of the durable `file_health` table. `file_path` is the virtual
/// path the mounted filesystem exposes; `library_path` is the absolute path
/// the ARR instance knows the same file by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHealth {
    pub file_path: String,
    pub library_path: Option<String>,
    pub status: HealthStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub repair_retry_count: i64,
    pub max_repair_retries: i64,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_details: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub scheduled_check_at: DateTime<Utc>,
    pub priority: i64,
    pub source_nzb_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileHealth {
    /// The timestamp the healthy-recheck schedule is derived from: the
    /// upstream release date when known, otherwise when tracking began.
    pub fn release_reference(&self) -> DateTime<Utc> {
        self.release_date.unwrap_or(self.created_at)
    }
}

/// Discriminator for one entry of a bulk health update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Healthy,
    Retry,
    RepairTrigger,
    RepairRetry,
    Corrupted,
    Skip,
}

/// One row's worth of state transition, applied together with its batch in
/// a single transaction at the end of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatusUpdate {
    pub file_path: String,
    pub update_type: UpdateType,
    pub error: Option<String>,
    pub error_details: Option<String>,
    pub scheduled_check_at: Option<DateTime<Utc>>,
}

impl HealthStatusUpdate {
    pub fn healthy(file_path: impl Into<String>, next_check: DateTime<Utc>) -> Self {
        Self {
            file_path: file_path.into(),
            update_type: UpdateType::Healthy,
            error: None,
            error_details: None,
            scheduled_check_at: Some(next_check),
        }
    }

    pub fn retry(
        file_path: impl Into<String>,
        error: Option<String>,
        error_details: Option<String>,
        next_check: DateTime<Utc>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            update_type: UpdateType::Retry,
            error,
            error_details,
            scheduled_check_at: Some(next_check),
        }
    }

    pub fn repair_trigger(
        file_path: impl Into<String>,
        error: Option<String>,
        error_details: Option<String>,
        next_notification: DateTime<Utc>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            update_type: UpdateType::RepairTrigger,
            error,
            error_details,
            scheduled_check_at: Some(next_notification),
        }
    }

    pub fn repair_retry(
        file_path: impl Into<String>,
        next_notification: DateTime<Utc>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            update_type: UpdateType::RepairRetry,
            error: None,
            error_details: None,
            scheduled_check_at: Some(next_notification),
        }
    }

    pub fn corrupted(file_path: impl Into<String>, error: Option<String>) -> Self {
        Self {
            file_path: file_path.into(),
            update_type: UpdateType::Corrupted,
            error,
            error_details: None,
            scheduled_check_at: None,
        }
    }

    pub fn skip(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            update_type: UpdateType::Skip,
            error: None,
            error_details: None,
            scheduled_check_at: None,
        }
    }
}
