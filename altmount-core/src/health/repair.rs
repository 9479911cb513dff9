use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use altmount_config::{Config, ConfigGetter};
use altmount_model::FileHealth;

use crate::arr::ArrService;
use crate::metadata::MetadataStore;

/// The three ways a repair attempt can land, mapped by the worker onto a
/// database update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// ARR accepted the rescan; the broken file's metadata has been
    /// quarantined and the row stays in repair.
    Triggered,
    /// The file has left ARR's world (upgraded, deleted, or never known);
    /// the row must be deleted, not retried.
    Deleted,
    /// ARR refused with a generic error; counts toward repair retries.
    Corrupted(String),
}

/// Drives an ARR instance to replace a broken file. Purely a function of
/// (config, ARR response) plus metadata side effects; repository writes
/// stay with the worker.
pub struct RepairOrchestrator {
    metadata: Arc<MetadataStore>,
    arr: Arc<dyn ArrService>,
    config: ConfigGetter,
}

impl fmt::Debug for RepairOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepairOrchestrator")
            .field("metadata_root", &self.metadata.root())
            .finish()
    }
}

impl RepairOrchestrator {
    pub fn new(
        metadata: Arc<MetadataStore>,
        arr: Arc<dyn ArrService>,
        config: ConfigGetter,
    ) -> Self {
        Self {
            metadata,
            arr,
            config,
        }
    }

    /// First escalation for a file whose detection retries are exhausted.
    /// The metadata move happens only after ARR accepts the call, so a
    /// failing ARR leaves the file visible to the user.
    pub async fn trigger_file_repair(
        &self,
        fh: &FileHealth,
        error: Option<&str>,
    ) -> RepairOutcome {
        match self.metadata.read(&fh.file_path) {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Deleted out-of-band (e.g. by the user); nothing to repair.
                debug!(
                    "metadata for {} vanished before repair; dropping the row",
                    fh.file_path
                );
                self.delete_artifacts(fh);
                return RepairOutcome::Deleted;
            }
            Err(err) => {
                // Unreadable is not the same as absent; repair anyway.
                warn!(
                    "could not re-read metadata for {} before repair: {err}",
                    fh.file_path
                );
            }
        }

        info!(
            "triggering repair for {} (detection error: {})",
            fh.file_path,
            error.unwrap_or("unknown")
        );

        let outcome = self.notify_arr(fh).await;
        match &outcome {
            RepairOutcome::Triggered => {
                // Stop serving the broken file now that a replacement is
                // on its way.
                if let Err(err) = self.metadata.move_to_corrupted(&fh.file_path) {
                    warn!(
                        "failed to quarantine metadata for {}: {err}",
                        fh.file_path
                    );
                }
            }
            RepairOutcome::Deleted => self.delete_artifacts(fh),
            RepairOutcome::Corrupted(_) => {}
        }
        outcome
    }

    /// Repeated notification for a row already in repair. The metadata was
    /// quarantined on the first trigger, so there is nothing to re-read or
    /// move.
    pub async fn retrigger_file_repair(&self, fh: &FileHealth) -> RepairOutcome {
        info!(
            "re-notifying ARR about {} (repair attempt {})",
            fh.file_path,
            fh.repair_retry_count + 1
        );

        let outcome = self.notify_arr(fh).await;
        if outcome == RepairOutcome::Deleted {
            self.delete_artifacts(fh);
        }
        outcome
    }

    async fn notify_arr(&self, fh: &FileHealth) -> RepairOutcome {
        let config = (self.config)();
        let rescan_path = resolve_rescan_path(&config, fh);

        match self
            .arr
            .trigger_file_rescan(&rescan_path, &fh.file_path)
            .await
        {
            Ok(()) => RepairOutcome::Triggered,
            Err(err) if err.is_sentinel() => {
                info!(
                    "{} is no longer tracked by ARR ({err}); dropping the row",
                    fh.file_path
                );
                RepairOutcome::Deleted
            }
            Err(err) => {
                warn!("ARR rejected repair of {}: {err}", fh.file_path);
                RepairOutcome::Corrupted(err.to_string())
            }
        }
    }

    fn delete_artifacts(&self, fh: &FileHealth) {
        let config = (self.config)();
        if let Err(err) = self.metadata.delete_with_optional_source_nzb(
            &fh.file_path,
            config.metadata.delete_source_nzb_on_removal,
        ) {
            warn!(
                "failed to delete metadata artefacts for {}: {err}",
                fh.file_path
            );
        }
    }
}

/// The path ARR identifies the file by: the stored library path when
/// known, otherwise the virtual path anchored under the import directory
/// or, failing that, the mount point.
fn resolve_rescan_path(config: &Config, fh: &FileHealth) -> String {
    if let Some(library_path) = &fh.library_path
        && !library_path.is_empty()
    {
        return library_path.clone();
    }

    let relative = fh.file_path.trim_start_matches('/');
    if let Some(import_dir) = &config.import.import_dir
        && !import_dir.as_os_str().is_empty()
    {
        return import_dir.join(relative).to_string_lossy().into_owned();
    }
    config
        .mount_path
        .join(relative)
        .to_string_lossy()
        .into_owned()
}
