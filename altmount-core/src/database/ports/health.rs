use async_trait::async_trait;
use chrono::{DateTime, Utc};

use altmount_model::{FileHealth, HealthStatus, HealthStatusUpdate};

use crate::Result;

/// Upsert request for a health row. Optional fields are set-if-provided;
/// `reset_retries` additionally clears both retry counters and the stored
/// error.
#[derive(Debug, Clone)]
pub struct UpsertFileHealth {
    pub file_path: String,
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub source_nzb_path: Option<String>,
    pub library_path: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub scheduled_check_at: Option<DateTime<Utc>>,
    pub priority: Option<i64>,
    pub max_retries: i64,
    pub max_repair_retries: i64,
    pub reset_retries: bool,
}

impl UpsertFileHealth {
    pub fn new(file_path: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            file_path: file_path.into(),
            status,
            last_error: None,
            source_nzb_path: None,
            library_path: None,
            release_date: None,
            scheduled_check_at: None,
            priority: None,
            max_retries: 3,
            max_repair_retries: 3,
            reset_retries: false,
        }
    }
}

/// Durable source of truth for every tracked file's health state. All
/// mutating calls are atomic with respect to one another on the same row;
/// the bulk update is one transaction.
#[async_trait]
pub trait HealthRepository: Send + Sync {
    async fn get_file_health(&self, file_path: &str) -> Result<Option<FileHealth>>;

    async fn upsert_file_health(&self, request: &UpsertFileHealth) -> Result<()>;

    /// Atomic pending-or-healthy to checking transition, stamping
    /// `last_checked`. Returns whether the lease was taken.
    async fn set_file_checking(&self, file_path: &str) -> Result<bool>;

    /// Startup housekeeping: demote every `checking` row to `pending` so a
    /// crash cannot leak leases. Returns the number of demoted rows.
    async fn reset_all_checking(&self) -> Result<u64>;

    /// Startup housekeeping: pending rows whose detection retries are
    /// exhausted get their counter cleared and become due immediately, so
    /// raising `max_retries` revives them.
    async fn reset_stale_pending(&self) -> Result<u64>;

    /// Due rows in detection states, highest priority first.
    async fn get_unhealthy_files(&self, limit: i64) -> Result<Vec<FileHealth>>;

    /// Due rows awaiting a repeated repair notification.
    async fn get_files_for_repair_notification(
        &self,
        limit: i64,
    ) -> Result<Vec<FileHealth>>;

    /// Applies a heterogeneous batch of state transitions in a single
    /// transaction.
    async fn update_health_status_bulk(
        &self,
        updates: &[HealthStatusUpdate],
    ) -> Result<()>;

    async fn delete_health_record(&self, file_path: &str) -> Result<()>;
}
