use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use altmount_config::{Config, ConfigGetter};
use altmount_model::{
    FileHealth, HealthEvent, HealthEventType, HealthStatus, HealthStatusUpdate,
    MetadataStatus, UpdateType, WorkerStats, WorkerStatus, priority,
};

use crate::arr::ArrService;
use crate::database::ports::health::{HealthRepository, UpsertFileHealth};
use crate::error::{HealthError, Result};
use crate::health::checker::{CheckOptions, FileChecker};
use crate::health::repair::{RepairOrchestrator, RepairOutcome};
use crate::health::schedule;
use crate::metadata::MetadataStore;
use crate::vfs::VfsNotifier;

/// Deadline for on-demand background checks.
const BACKGROUND_CHECK_TIMEOUT: StdDuration = StdDuration::from_secs(600);

struct WorkerState {
    status: WorkerStatus,
    cycle_running: bool,
    shutdown: Option<CancellationToken>,
    loop_handle: Option<JoinHandle<()>>,
}

/// The scheduler binding the repository, checker, repair orchestrator, and
/// VFS invalidation into a long-running service. There is no in-memory
/// queue: the durable `file_health` table ordered by
/// `(priority, scheduled_check_at)` is the queue.
pub struct HealthWorker {
    repository: Arc<dyn HealthRepository>,
    metadata: Arc<MetadataStore>,
    checker: Arc<dyn FileChecker>,
    repair: RepairOrchestrator,
    vfs: Arc<dyn VfsNotifier>,
    config: ConfigGetter,
    state: Mutex<WorkerState>,
    active_checks: Mutex<HashMap<String, CancellationToken>>,
    stats: Mutex<WorkerStats>,
}

impl fmt::Debug for HealthWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .state
            .lock()
            .map(|state| state.status)
            .unwrap_or_default();
        let active = self
            .active_checks
            .lock()
            .map(|checks| checks.len())
            .unwrap_or_default();

        f.debug_struct("HealthWorker")
            .field("status", &status)
            .field("active_checks", &active)
            .finish()
    }
}

impl HealthWorker {
    pub fn new(
        repository: Arc<dyn HealthRepository>,
        metadata: Arc<MetadataStore>,
        checker: Arc<dyn FileChecker>,
        arr: Arc<dyn ArrService>,
        vfs: Arc<dyn VfsNotifier>,
        config: ConfigGetter,
    ) -> Self {
        let repair =
            RepairOrchestrator::new(Arc::clone(&metadata), arr, config.clone());

        Self {
            repository,
            metadata,
            checker,
            repair,
            vfs,
            config,
            state: Mutex::new(WorkerState {
                status: WorkerStatus::Stopped,
                cycle_running: false,
                shutdown: None,
                loop_handle: None,
            }),
            active_checks: Mutex::new(HashMap::new()),
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    /// Starts the scheduling loop. Refuses a second start; succeeds as a
    /// no-op when health checking is disabled in configuration. Startup
    /// housekeeping restores the invariant that no row rests in
    /// `checking` and revives rows whose retries were exhausted under an
    /// older, lower `max_retries`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let config = (self.config)();
        {
            let mut state = self.state.lock().unwrap();
            if state.status != WorkerStatus::Stopped {
                return Err(HealthError::Internal(
                    "health worker already running".to_string(),
                ));
            }
            if !config.health.enabled {
                info!("health checking disabled; worker not started");
                return Ok(());
            }
            state.status = WorkerStatus::Starting;
        }

        let housekeeping = async {
            let demoted = self.repository.reset_all_checking().await?;
            if demoted > 0 {
                warn!("reset {demoted} leaked checking leases from a previous run");
            }
            let revived = self.repository.reset_stale_pending().await?;
            if revived > 0 {
                info!("revived {revived} files with exhausted detection retries");
            }
            Ok::<_, HealthError>(())
        };
        if let Err(err) = housekeeping.await {
            self.state.lock().unwrap().status = WorkerStatus::Stopped;
            return Err(err);
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let worker = Arc::clone(self);
            let shutdown = shutdown.clone();
            async move { worker.run_loop(shutdown).await }
        });

        {
            let mut state = self.state.lock().unwrap();
            state.status = WorkerStatus::Running;
            state.shutdown = Some(shutdown);
            state.loop_handle = Some(handle);
        }

        info!(
            "health worker started (interval {:?}, {} concurrent jobs)",
            config.health.check_interval(),
            config.health.max_concurrent_jobs
        );
        Ok(())
    }

    /// Signals the loop and waits for the in-flight cycle to drain.
    pub async fn stop(&self) -> Result<()> {
        let (shutdown, handle) = {
            let mut state = self.state.lock().unwrap();
            if state.status != WorkerStatus::Running {
                return Ok(());
            }
            state.status = WorkerStatus::Stopping;
            (state.shutdown.take(), state.loop_handle.take())
        };

        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            error!("health worker loop ended abnormally: {err}");
        }

        let mut state = self.state.lock().unwrap();
        state.status = WorkerStatus::Stopped;
        state.cycle_running = false;
        info!("health worker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().status == WorkerStatus::Running
    }

    pub fn status(&self) -> WorkerStatus {
        self.state.lock().unwrap().status
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn is_cycle_running(&self) -> bool {
        self.state.lock().unwrap().cycle_running
    }

    pub fn is_check_active(&self, path: &str) -> bool {
        self.active_checks.lock().unwrap().contains_key(path)
    }

    /// Upserts a pending row for the path. An existing row is re-queued
    /// in place: counters, release date, and library path survive.
    pub async fn add_to_health_check(
        &self,
        path: &str,
        source_nzb: Option<String>,
    ) -> Result<()> {
        let config = (self.config)();
        let mut request = UpsertFileHealth::new(path, HealthStatus::Pending);
        request.source_nzb_path = source_nzb;
        request.scheduled_check_at = Some(Utc::now());
        request.priority = Some(priority::MANUAL);
        request.max_retries = config.health.max_retries;
        request.max_repair_retries = config.health.max_repair_retries;
        self.repository.upsert_file_health(&request).await?;
        debug!("queued {path} for health checking");
        Ok(())
    }

    /// Runs one check for the path out-of-band with its own deadline. The
    /// caller does not await the result; on timeout or failure the row is
    /// left pending with the error recorded and `retry_count` untouched.
    pub fn perform_background_check(self: &Arc<Self>, path: impl Into<String>) {
        let path = path.into();
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                BACKGROUND_CHECK_TIMEOUT,
                worker.background_check(&path),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(HealthError::Cancelled(_))) => {
                    info!("background check of {path} was cancelled");
                }
                Ok(Err(err)) => {
                    warn!("background check of {path} failed: {err}");
                    worker.release_with_error(&path, &err.to_string()).await;
                }
                Err(_) => {
                    warn!("background check of {path} timed out");
                    worker
                        .release_with_error(&path, "background check timed out")
                        .await;
                }
            }
        });
    }

    /// Cancels a currently running check and returns the row to the pool
    /// with its counters untouched.
    pub async fn cancel_health_check(&self, path: &str) -> Result<()> {
        let token = self.active_checks.lock().unwrap().remove(path);
        let Some(token) = token else {
            return Err(HealthError::NotFound(format!(
                "no active health check for {path}"
            )));
        };
        token.cancel();

        let mut request = UpsertFileHealth::new(path, HealthStatus::Pending);
        request.scheduled_check_at = Some(Utc::now());
        self.repository.upsert_file_health(&request).await?;
        info!("cancelled health check for {path}");
        Ok(())
    }

    /// Runs one cycle inline. Rejected while another cycle is in flight;
    /// used by tests and the operator "run now" surface.
    pub async fn run_cycle_now(&self) -> Result<()> {
        self.run_cycle(CancellationToken::new()).await
    }

    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = (self.config)().health.check_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let still_running = in_flight
                        .as_ref()
                        .is_some_and(|handle| !handle.is_finished());
                    if still_running {
                        debug!("previous health cycle still running; skipping tick");
                        continue;
                    }
                    self.reap_cycle(in_flight.take()).await;

                    let worker = Arc::clone(&self);
                    let cancel = shutdown.clone();
                    in_flight = Some(tokio::spawn(async move {
                        if let Err(err) = worker.run_cycle(cancel).await {
                            error!("health cycle failed: {err}");
                            worker.record_error(&err.to_string());
                        }
                    }));
                }
            }
        }

        // Let the in-flight cycle drain; its per-file checks observe the
        // shutdown token and return promptly.
        self.reap_cycle(in_flight.take()).await;
        info!("health worker loop exited");
    }

    /// A panicking cycle must not take the service down; it becomes an
    /// error counter instead.
    async fn reap_cycle(&self, handle: Option<JoinHandle<()>>) {
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            if err.is_panic() {
                error!("health cycle panicked: {err}");
                self.record_error("health cycle panicked");
            }
            self.state.lock().unwrap().cycle_running = false;
        }
    }

    async fn run_cycle(&self, cancel: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.cycle_running {
                return Err(HealthError::Internal(
                    "health cycle already running".to_string(),
                ));
            }
            state.cycle_running = true;
        }

        let result = self.cycle_inner(&cancel).await;
        self.state.lock().unwrap().cycle_running = false;

        if let Err(err) = &result {
            self.record_error(&err.to_string());
        }
        result
    }

    async fn cycle_inner(&self, cancel: &CancellationToken) -> Result<()> {
        let config = (self.config)();
        let jobs = config.health.max_concurrent_jobs.max(1);

        let due_check = self.repository.get_unhealthy_files(jobs as i64).await?;
        let due_repair = self
            .repository
            .get_files_for_repair_notification(jobs as i64)
            .await?;

        if due_check.is_empty() && due_repair.is_empty() {
            self.finish_cycle(&config, 0, &[]);
            return Ok(());
        }
        debug!(
            "health cycle: {} files to check, {} repairs to notify",
            due_check.len(),
            due_repair.len()
        );

        let checked = due_check.len() as u64;
        let mut updates: Vec<HealthStatusUpdate> = stream::iter(due_check)
            .map(|fh| {
                let config = Arc::clone(&config);
                async move { self.process_due_file(fh, &config, cancel).await }
            })
            .buffer_unordered(jobs)
            .filter_map(|update| async move { update })
            .collect()
            .await;

        let repair_updates: Vec<HealthStatusUpdate> = stream::iter(due_repair)
            .map(|fh| {
                let config = Arc::clone(&config);
                async move { self.process_repair_notification(fh, &config).await }
            })
            .buffer_unordered(jobs)
            .collect()
            .await;
        updates.extend(repair_updates);

        // Tidy directories vacated by imports and quarantine moves.
        let protected = config.protected_directory_names();
        match self.metadata.cleanup_empty_directories("", &protected) {
            Ok(removed) if removed > 0 => {
                debug!("removed {removed} empty metadata directories");
            }
            Ok(_) => {}
            Err(err) => warn!("metadata directory cleanup failed: {err}"),
        }

        self.repository.update_health_status_bulk(&updates).await?;
        self.finish_cycle(&config, checked, &updates);
        Ok(())
    }

    /// One detection-phase file: take the checking lease, run the check,
    /// and fold the event through the state machine. `None` means no
    /// update belongs in the batch (lease lost or check cancelled).
    async fn process_due_file(
        &self,
        fh: FileHealth,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Option<HealthStatusUpdate> {
        match self.repository.set_file_checking(&fh.file_path).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "skipping {}: row vanished or already checking",
                    fh.file_path
                );
                return None;
            }
            Err(err) => {
                warn!("could not lease {}: {err}", fh.file_path);
                return None;
            }
        }

        let token = cancel.child_token();
        self.active_checks
            .lock()
            .unwrap()
            .insert(fh.file_path.clone(), token.clone());
        let checked = self
            .checker
            .check(&fh.file_path, CheckOptions::default(), &token)
            .await;
        self.active_checks.lock().unwrap().remove(&fh.file_path);

        let event = match checked {
            Ok(event) => event,
            Err(HealthError::Cancelled(_)) => {
                // cancel_health_check already returned the row to pending.
                return None;
            }
            Err(err) => HealthEvent::check_failed(err.to_string()),
        };

        let update = self.apply_detection_event(&fh, &event, config).await;
        self.vfs.invalidate(&fh.file_path, &event).await;
        Some(update)
    }

    /// Detection-phase state machine (one file, one event).
    async fn apply_detection_event(
        &self,
        fh: &FileHealth,
        event: &HealthEvent,
        config: &Config,
    ) -> HealthStatusUpdate {
        let now = Utc::now();
        match event.event_type {
            HealthEventType::FileRemoved => {
                // Zombie row: converge by dropping it and its artefacts.
                info!("metadata for {} is gone; removing the row", fh.file_path);
                if let Err(err) =
                    self.repository.delete_health_record(&fh.file_path).await
                {
                    warn!("failed to delete zombie row {}: {err}", fh.file_path);
                }
                if let Err(err) = self.metadata.delete_with_optional_source_nzb(
                    &fh.file_path,
                    config.metadata.delete_source_nzb_on_removal,
                ) {
                    warn!(
                        "failed to delete artefacts of zombie {}: {err}",
                        fh.file_path
                    );
                }
                HealthStatusUpdate::skip(&fh.file_path)
            }
            HealthEventType::FileHealthy => {
                if let Err(err) = self
                    .metadata
                    .update_status(&fh.file_path, MetadataStatus::Healthy)
                {
                    warn!(
                        "failed to mark metadata healthy for {}: {err}",
                        fh.file_path
                    );
                }
                let next = schedule::next_healthy_check(fh.release_reference(), now);
                HealthStatusUpdate::healthy(&fh.file_path, next)
            }
            HealthEventType::FileCorrupted | HealthEventType::CheckFailed => {
                if fh.status == HealthStatus::RepairTriggered {
                    // Repair rows are never re-checked; defensive only.
                    return self.apply_repair_phase(fh, config).await;
                }

                if fh.retry_count < fh.max_retries - 1 {
                    let next = now + schedule::detection_backoff(fh.retry_count);
                    debug!(
                        "{} failed check {}/{}; retrying at {next}",
                        fh.file_path,
                        fh.retry_count + 1,
                        fh.max_retries
                    );
                    HealthStatusUpdate::retry(
                        &fh.file_path,
                        event.error.clone(),
                        event.details.clone(),
                        next,
                    )
                } else {
                    // This failure exhausts detection retries: escalate.
                    let outcome = self
                        .repair
                        .trigger_file_repair(fh, event.error.as_deref())
                        .await;
                    self.map_repair_outcome(fh, outcome, event, config, now)
                        .await
                }
            }
        }
    }

    /// Repair-phase state machine for rows already in `repair_triggered`.
    async fn process_repair_notification(
        &self,
        fh: FileHealth,
        config: &Config,
    ) -> HealthStatusUpdate {
        self.apply_repair_phase(&fh, config).await
    }

    async fn apply_repair_phase(
        &self,
        fh: &FileHealth,
        config: &Config,
    ) -> HealthStatusUpdate {
        let now = Utc::now();

        if fh.repair_retry_count >= fh.max_repair_retries - 1 {
            error!(
                "repair retries exhausted for {}; marking permanently corrupted",
                fh.file_path
            );
            return HealthStatusUpdate::corrupted(
                &fh.file_path,
                Some("repair retries exhausted".to_string()),
            );
        }

        let outcome = self.repair.retrigger_file_repair(fh).await;
        match outcome {
            RepairOutcome::Triggered => {
                let delay = schedule::repair_backoff(
                    retrigger_delay(config),
                    fh.repair_retry_count + 1,
                );
                HealthStatusUpdate::repair_retry(&fh.file_path, now + delay)
            }
            RepairOutcome::Deleted => {
                if let Err(err) =
                    self.repository.delete_health_record(&fh.file_path).await
                {
                    warn!("failed to delete row {}: {err}", fh.file_path);
                }
                HealthStatusUpdate::skip(&fh.file_path)
            }
            RepairOutcome::Corrupted(message) => {
                HealthStatusUpdate::corrupted(&fh.file_path, Some(message))
            }
        }
    }

    async fn map_repair_outcome(
        &self,
        fh: &FileHealth,
        outcome: RepairOutcome,
        event: &HealthEvent,
        config: &Config,
        now: chrono::DateTime<Utc>,
    ) -> HealthStatusUpdate {
        match outcome {
            RepairOutcome::Triggered => HealthStatusUpdate::repair_trigger(
                &fh.file_path,
                event.error.clone(),
                event.details.clone(),
                now + retrigger_delay(config),
            ),
            RepairOutcome::Deleted => {
                if let Err(err) =
                    self.repository.delete_health_record(&fh.file_path).await
                {
                    warn!("failed to delete row {}: {err}", fh.file_path);
                }
                HealthStatusUpdate::skip(&fh.file_path)
            }
            RepairOutcome::Corrupted(message) => {
                HealthStatusUpdate::corrupted(&fh.file_path, Some(message))
            }
        }
    }

    async fn background_check(&self, path: &str) -> Result<()> {
        let config = (self.config)();

        let fh = match self.repository.get_file_health(path).await? {
            Some(fh) => fh,
            None => {
                self.add_to_health_check(path, None).await?;
                self.repository
                    .get_file_health(path)
                    .await?
                    .ok_or_else(|| {
                        HealthError::Internal(format!(
                            "health row for {path} vanished after creation"
                        ))
                    })?
            }
        };

        if !self.repository.set_file_checking(path).await? {
            return Err(HealthError::Internal(format!(
                "{path} is already being checked"
            )));
        }

        let token = CancellationToken::new();
        self.active_checks
            .lock()
            .unwrap()
            .insert(path.to_string(), token.clone());
        let checked = self
            .checker
            .check(path, CheckOptions::default(), &token)
            .await;
        self.active_checks.lock().unwrap().remove(path);

        let event = checked?;
        let update = self.apply_detection_event(&fh, &event, &config).await;
        if update.update_type != UpdateType::Skip {
            self.repository
                .update_health_status_bulk(std::slice::from_ref(&update))
                .await?;
        }
        self.vfs.invalidate(path, &event).await;
        Ok(())
    }

    /// Releases a stuck lease after a failed or timed-out background
    /// check. Counters stay untouched; only the error is recorded.
    async fn release_with_error(&self, path: &str, message: &str) {
        self.active_checks.lock().unwrap().remove(path);

        let mut request = UpsertFileHealth::new(path, HealthStatus::Pending);
        request.last_error = Some(message.to_string());
        request.scheduled_check_at = Some(Utc::now());
        if let Err(err) = self.repository.upsert_file_health(&request).await {
            error!("failed to release {path} after background check: {err}");
        }
        self.record_error(message);
    }

    fn finish_cycle(&self, config: &Config, checked: u64, updates: &[HealthStatusUpdate]) {
        let corrupted = updates
            .iter()
            .filter(|u| u.update_type == UpdateType::Corrupted)
            .count() as u64;
        let repairs = updates
            .iter()
            .filter(|u| u.update_type == UpdateType::RepairTrigger)
            .count() as u64;

        let now = Utc::now();
        let interval = Duration::from_std(config.health.check_interval())
            .unwrap_or_else(|_| Duration::seconds(300));

        let mut stats = self.stats.lock().unwrap();
        stats.total_runs_completed += 1;
        stats.total_files_checked += checked;
        stats.corrupted_detected += corrupted;
        stats.repairs_triggered += repairs;
        stats.last_run_time = Some(now);
        stats.next_run_time = Some(now + interval);
    }

    fn record_error(&self, message: &str) {
        let mut stats = self.stats.lock().unwrap();
        stats.error_count += 1;
        stats.last_error = Some(message.to_string());
    }
}

fn retrigger_delay(config: &Config) -> Duration {
    Duration::from_std(config.health.repair_retrigger_delay())
        .unwrap_or_else(|_| Duration::minutes(30))
}
