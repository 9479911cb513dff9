use async_trait::async_trait;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use altmount_model::{
    FileHealth, HealthStatus, HealthStatusUpdate, UpdateType,
};

use crate::database::ports::health::{HealthRepository, UpsertFileHealth};
use crate::error::{HealthError, Result};

#[derive(Clone, Debug)]
pub struct SqliteHealthRepository {
    pool: SqlitePool,
}

impl SqliteHealthRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, file_path: &str) -> Result<Option<FileHealth>> {
        let row = sqlx::query_as::<_, FileHealthRow>(
            r#"
            SELECT file_path, library_path, status, retry_count, max_retries,
                   repair_retry_count, max_repair_retries, last_checked,
                   last_error, error_details, release_date, scheduled_check_at,
                   priority, source_nzb_path, created_at, updated_at
            FROM file_health
            WHERE file_path = ?1
            "#,
        )
        .bind(file_path)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| {
            HealthError::Internal(format!("Failed to get file health: {e}"))
        })?;

        Ok(row.map(|r| r.into()))
    }

    async fn fetch_due(
        &self,
        statuses: &[&str],
        limit: i64,
    ) -> Result<Vec<FileHealth>> {
        let placeholders = statuses
            .iter()
            .enumerate()
            .map(|(idx, _)| format!("?{}", idx + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT file_path, library_path, status, retry_count, max_retries,
                   repair_retry_count, max_repair_retries, last_checked,
                   last_error, error_details, release_date, scheduled_check_at,
                   priority, source_nzb_path, created_at, updated_at
            FROM file_health
            WHERE scheduled_check_at <= ?1 AND status IN ({placeholders})
            ORDER BY priority DESC, scheduled_check_at ASC
            LIMIT ?2
            "#
        );

        let mut query = sqlx::query_as::<_, FileHealthRow>(&sql)
            .bind(Utc::now())
            .bind(limit);
        for status in statuses {
            query = query.bind(*status);
        }

        let rows = query.fetch_all(self.pool()).await.map_err(|e| {
            HealthError::Internal(format!("Failed to get due files: {e}"))
        })?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }
}

#[async_trait]
impl HealthRepository for SqliteHealthRepository {
    async fn get_file_health(&self, file_path: &str) -> Result<Option<FileHealth>> {
        self.fetch(file_path).await
    }

    async fn upsert_file_health(&self, request: &UpsertFileHealth) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO file_health (
                file_path, library_path, status, retry_count, max_retries,
                repair_retry_count, max_repair_retries, last_error,
                release_date, scheduled_check_at, priority, source_nzb_path,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, 0, ?4, 0, ?5, ?6, ?7,
                COALESCE(?8, ?11), COALESCE(?9, 0), ?10, ?11, ?11
            )
            ON CONFLICT(file_path) DO UPDATE SET
                status = ?3,
                library_path = COALESCE(?2, library_path),
                max_retries = ?4,
                max_repair_retries = ?5,
                last_error = CASE WHEN ?12 THEN NULL
                             ELSE COALESCE(?6, last_error) END,
                error_details = CASE WHEN ?12 THEN NULL
                                ELSE error_details END,
                release_date = COALESCE(?7, release_date),
                scheduled_check_at = COALESCE(?8, scheduled_check_at),
                priority = MAX(priority, COALESCE(?9, priority)),
                retry_count = CASE WHEN ?12 THEN 0 ELSE retry_count END,
                repair_retry_count = CASE WHEN ?12 THEN 0
                                     ELSE repair_retry_count END,
                source_nzb_path = COALESCE(?10, source_nzb_path),
                updated_at = ?11
            "#,
        )
        .bind(&request.file_path)
        .bind(&request.library_path)
        .bind(request.status.as_str())
        .bind(request.max_retries)
        .bind(request.max_repair_retries)
        .bind(&request.last_error)
        .bind(request.release_date)
        .bind(request.scheduled_check_at)
        .bind(request.priority)
        .bind(&request.source_nzb_path)
        .bind(now)
        .bind(request.reset_retries)
        .execute(self.pool())
        .await
        .map_err(|e| {
            HealthError::Internal(format!("Failed to upsert file health: {e}"))
        })?;

        Ok(())
    }

    async fn set_file_checking(&self, file_path: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE file_health
            SET status = 'checking', last_checked = ?2, updated_at = ?2
            WHERE file_path = ?1 AND status IN ('pending', 'healthy')
            "#,
        )
        .bind(file_path)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| {
            HealthError::Internal(format!("Failed to set file checking: {e}"))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_all_checking(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE file_health
            SET status = 'pending', updated_at = ?1
            WHERE status = 'checking'
            "#,
        )
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map_err(|e| {
            HealthError::Internal(format!("Failed to reset checking rows: {e}"))
        })?;

        Ok(result.rows_affected())
    }

    async fn reset_stale_pending(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE file_health
            SET retry_count = 0, scheduled_check_at = ?1, updated_at = ?1
            WHERE status = 'pending' AND retry_count >= max_retries
            "#,
        )
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map_err(|e| {
            HealthError::Internal(format!("Failed to reset stale pending rows: {e}"))
        })?;

        Ok(result.rows_affected())
    }

    async fn get_unhealthy_files(&self, limit: i64) -> Result<Vec<FileHealth>> {
        self.fetch_due(&["pending", "corrupted"], limit).await
    }

    async fn get_files_for_repair_notification(
        &self,
        limit: i64,
    ) -> Result<Vec<FileHealth>> {
        self.fetch_due(&["repair_triggered"], limit).await
    }

    async fn update_health_status_bulk(
        &self,
        updates: &[HealthStatusUpdate],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool().begin().await.map_err(|e| {
            HealthError::Internal(format!("Failed to begin bulk update: {e}"))
        })?;

        for update in updates {
            let scheduled = update.scheduled_check_at.unwrap_or(now);
            let result = match update.update_type {
                UpdateType::Healthy => {
                    sqlx::query(
                        r#"
                        UPDATE file_health
                        SET status = 'healthy', retry_count = 0,
                            last_error = NULL, error_details = NULL,
                            scheduled_check_at = ?2, updated_at = ?3
                        WHERE file_path = ?1
                        "#,
                    )
                    .bind(&update.file_path)
                    .bind(scheduled)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                }
                UpdateType::Retry => {
                    sqlx::query(
                        r#"
                        UPDATE file_health
                        SET status = 'pending', retry_count = retry_count + 1,
                            last_error = ?2, error_details = ?3,
                            scheduled_check_at = ?4, updated_at = ?5
                        WHERE file_path = ?1
                        "#,
                    )
                    .bind(&update.file_path)
                    .bind(&update.error)
                    .bind(&update.error_details)
                    .bind(scheduled)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                }
                UpdateType::RepairTrigger => {
                    sqlx::query(
                        r#"
                        UPDATE file_health
                        SET status = 'repair_triggered', repair_retry_count = 0,
                            last_error = COALESCE(?2, last_error),
                            error_details = COALESCE(?3, error_details),
                            scheduled_check_at = ?4, updated_at = ?5
                        WHERE file_path = ?1
                        "#,
                    )
                    .bind(&update.file_path)
                    .bind(&update.error)
                    .bind(&update.error_details)
                    .bind(scheduled)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                }
                UpdateType::RepairRetry => {
                    sqlx::query(
                        r#"
                        UPDATE file_health
                        SET status = 'repair_triggered',
                            repair_retry_count = repair_retry_count + 1,
                            scheduled_check_at = ?2, updated_at = ?3
                        WHERE file_path = ?1
                        "#,
                    )
                    .bind(&update.file_path)
                    .bind(scheduled)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                }
                UpdateType::Corrupted => {
                    sqlx::query(
                        r#"
                        UPDATE file_health
                        SET status = 'corrupted',
                            last_error = COALESCE(?2, last_error),
                            updated_at = ?3
                        WHERE file_path = ?1
                        "#,
                    )
                    .bind(&update.file_path)
                    .bind(&update.error)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                }
                UpdateType::Skip => continue,
            };

            result.map_err(|e| {
                HealthError::Internal(format!(
                    "Failed to apply {:?} update for {}: {e}",
                    update.update_type, update.file_path
                ))
            })?;
        }

        tx.commit().await.map_err(|e| {
            HealthError::Internal(format!("Failed to commit bulk update: {e}"))
        })?;

        Ok(())
    }

    async fn delete_health_record(&self, file_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_health WHERE file_path = ?1")
            .bind(file_path)
            .execute(self.pool())
            .await
            .map_err(|e| {
                HealthError::Internal(format!("Failed to delete health record: {e}"))
            })?;

        Ok(())
    }
}

// Database row type for file health
#[derive(sqlx::FromRow)]
struct FileHealthRow {
    file_path: String,
    library_path: Option<String>,
    status: String,
    retry_count: i64,
    max_retries: i64,
    repair_retry_count: i64,
    max_repair_retries: i64,
    last_checked: Option<DateTime<Utc>>,
    last_error: Option<String>,
    error_details: Option<String>,
    release_date: Option<DateTime<Utc>>,
    scheduled_check_at: DateTime<Utc>,
    priority: i64,
    source_nzb_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FileHealthRow> for FileHealth {
    fn from(row: FileHealthRow) -> Self {
        let status = row
            .status
            .parse::<HealthStatus>()
            .unwrap_or(HealthStatus::Pending);

        FileHealth {
            file_path: row.file_path,
            library_path: row.library_path,
            status,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            repair_retry_count: row.repair_retry_count,
            max_repair_retries: row.max_repair_retries,
            last_checked: row.last_checked,
            last_error: row.last_error,
            error_details: row.error_details,
            release_date: row.release_date,
            scheduled_check_at: row.scheduled_check_at,
            priority: row.priority,
            source_nzb_path: row.source_nzb_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use altmount_model::priority;
    use chrono::Duration;

    async fn repository() -> SqliteHealthRepository {
        let pool = crate::database::connect("sqlite::memory:").await.unwrap();
        SqliteHealthRepository::new(pool)
    }

    fn pending(path: &str) -> UpsertFileHealth {
        let mut request = UpsertFileHealth::new(path, HealthStatus::Pending);
        request.scheduled_check_at = Some(Utc::now() - Duration::minutes(1));
        request
    }

    #[tokio::test]
    async fn upsert_preserves_counters_unless_reset() {
        let repo = repository().await;
        repo.upsert_file_health(&pending("a.mkv")).await.unwrap();

        // Simulate a detection failure.
        repo.update_health_status_bulk(&[HealthStatusUpdate::retry(
            "a.mkv",
            Some("probe failed".to_string()),
            None,
            Utc::now(),
        )])
        .await
        .unwrap();

        // A plain re-queue keeps the counter and error.
        repo.upsert_file_health(&pending("a.mkv")).await.unwrap();
        let row = repo.get_file_health("a.mkv").await.unwrap().unwrap();
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.last_error.as_deref(), Some("probe failed"));

        // A resetting upsert clears both.
        let mut reset = pending("a.mkv");
        reset.reset_retries = true;
        repo.upsert_file_health(&reset).await.unwrap();
        let row = repo.get_file_health("a.mkv").await.unwrap().unwrap();
        assert_eq!(row.retry_count, 0);
        assert!(row.last_error.is_none());
    }

    #[tokio::test]
    async fn checking_lease_is_exclusive() {
        let repo = repository().await;
        repo.upsert_file_health(&pending("a.mkv")).await.unwrap();

        assert!(repo.set_file_checking("a.mkv").await.unwrap());
        // Second lease attempt fails while the row is checking.
        assert!(!repo.set_file_checking("a.mkv").await.unwrap());
        // Vanished rows cannot be leased either.
        assert!(!repo.set_file_checking("ghost.mkv").await.unwrap());

        assert_eq!(repo.reset_all_checking().await.unwrap(), 1);
        let row = repo.get_file_health("a.mkv").await.unwrap().unwrap();
        assert_eq!(row.status, HealthStatus::Pending);
    }

    #[tokio::test]
    async fn due_selection_orders_by_priority_then_age() {
        let repo = repository().await;

        let mut old = pending("old.mkv");
        old.scheduled_check_at = Some(Utc::now() - Duration::hours(2));
        repo.upsert_file_health(&old).await.unwrap();

        let mut urgent = pending("urgent.mkv");
        urgent.priority = Some(priority::MANUAL);
        repo.upsert_file_health(&urgent).await.unwrap();

        let mut future = pending("future.mkv");
        future.scheduled_check_at = Some(Utc::now() + Duration::hours(1));
        repo.upsert_file_health(&future).await.unwrap();

        let due = repo.get_unhealthy_files(10).await.unwrap();
        let paths: Vec<_> = due.iter().map(|fh| fh.file_path.as_str()).collect();
        assert_eq!(paths, vec!["urgent.mkv", "old.mkv"]);
    }

    #[tokio::test]
    async fn stale_pending_rows_are_revived() {
        let repo = repository().await;
        repo.upsert_file_health(&pending("worn.mkv")).await.unwrap();

        // Exhaust the detection counter directly.
        sqlx::query("UPDATE file_health SET retry_count = max_retries WHERE file_path = ?1")
            .bind("worn.mkv")
            .execute(repo.pool())
            .await
            .unwrap();

        assert_eq!(repo.reset_stale_pending().await.unwrap(), 1);
        let row = repo.get_file_health("worn.mkv").await.unwrap().unwrap();
        assert_eq!(row.retry_count, 0);
    }

    #[tokio::test]
    async fn bulk_update_applies_every_discriminator() {
        let repo = repository().await;
        for path in ["h.mkv", "r.mkv", "t.mkv", "c.mkv"] {
            repo.upsert_file_health(&pending(path)).await.unwrap();
        }

        let next = Utc::now() + Duration::days(1);
        repo.update_health_status_bulk(&[
            HealthStatusUpdate::healthy("h.mkv", next),
            HealthStatusUpdate::retry("r.mkv", Some("miss".into()), None, next),
            HealthStatusUpdate::repair_trigger("t.mkv", Some("gone".into()), None, next),
            HealthStatusUpdate::corrupted("c.mkv", Some("dead".into())),
            HealthStatusUpdate::skip("h.mkv"),
        ])
        .await
        .unwrap();

        let healthy = repo.get_file_health("h.mkv").await.unwrap().unwrap();
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert_eq!(healthy.retry_count, 0);

        let retried = repo.get_file_health("r.mkv").await.unwrap().unwrap();
        assert_eq!(retried.status, HealthStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.last_error.as_deref(), Some("miss"));

        let triggered = repo.get_file_health("t.mkv").await.unwrap().unwrap();
        assert_eq!(triggered.status, HealthStatus::RepairTriggered);
        assert_eq!(triggered.repair_retry_count, 0);

        let corrupted = repo.get_file_health("c.mkv").await.unwrap().unwrap();
        assert_eq!(corrupted.status, HealthStatus::Corrupted);
    }
}
