use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use altmount_model::{FileMetadata, MetadataStatus};

use crate::error::{HealthError, Result};

/// Name of the quarantine tree, created beside the metadata root.
const CORRUPTED_TREE_NAME: &str = "corrupted_metadata";

/// Extension of serialized records within the tree.
const RECORD_EXTENSION: &str = "json";

/// On-disk store holding one serialized [`FileMetadata`] record per virtual
/// path, plus the sibling quarantine tree for files handed off to an ARR
/// for replacement.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
    corrupted_root: PathBuf,
}

impl MetadataStore {
    /// Creates a store rooted at `root`. The root and its quarantine
    /// sibling are created if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let corrupted_root = match root.parent() {
            Some(parent) if parent != Path::new("") => {
                parent.join(CORRUPTED_TREE_NAME)
            }
            _ => root.join(CORRUPTED_TREE_NAME),
        };

        fs::create_dir_all(&root)?;
        fs::create_dir_all(&corrupted_root)?;

        Ok(Self {
            root,
            corrupted_root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn corrupted_root(&self) -> &Path {
        &self.corrupted_root
    }

    /// Reads the record for a virtual path. A missing record is `Ok(None)`,
    /// distinct from a read or parse failure.
    pub fn read(&self, virtual_path: &str) -> Result<Option<FileMetadata>> {
        let record = self.record_path(&self.root, virtual_path)?;
        let raw = match fs::read(&record) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = serde_json::from_slice(&raw)?;
        Ok(Some(metadata))
    }

    /// Replaces the record for a virtual path. The write goes to a
    /// temporary file in the same directory and is renamed into place, so
    /// concurrent readers never observe a torn record.
    pub fn write(&self, virtual_path: &str, metadata: &FileMetadata) -> Result<()> {
        let record = self.record_path(&self.root, virtual_path)?;
        let parent = record
            .parent()
            .ok_or_else(|| {
                HealthError::Internal(format!(
                    "metadata record {} has no parent directory",
                    record.display()
                ))
            })?
            .to_path_buf();
        fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        serde_json::to_writer(&mut tmp, metadata)?;
        tmp.flush()?;
        tmp.persist(&record).map_err(|e| e.error)?;
        Ok(())
    }

    /// Rewrites only the status field of an existing record.
    pub fn update_status(&self, virtual_path: &str, status: MetadataStatus) -> Result<()> {
        let Some(mut metadata) = self.read(virtual_path)? else {
            return Err(HealthError::NotFound(format!(
                "no metadata record for {virtual_path}"
            )));
        };
        if metadata.status == status {
            return Ok(());
        }
        metadata.status = status;
        self.write(virtual_path, &metadata)
    }

    /// Relocates a record into the quarantine tree, preserving the
    /// relative sub-path. After this call `read` returns `None` for the
    /// path. Moving an already-missing record is a no-op.
    pub fn move_to_corrupted(&self, virtual_path: &str) -> Result<()> {
        let source = self.record_path(&self.root, virtual_path)?;
        if !source.exists() {
            debug!("metadata for {virtual_path} already quarantined or gone");
            return Ok(());
        }

        let target = self.record_path(&self.corrupted_root, virtual_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;
        debug!("quarantined metadata for {virtual_path}");
        Ok(())
    }

    /// Removes the record for a virtual path; a missing record is not an
    /// error. When `also_delete_nzb` is set and the record names a
    /// reachable source NZB, that artefact is removed too (best-effort).
    pub fn delete_with_optional_source_nzb(
        &self,
        virtual_path: &str,
        also_delete_nzb: bool,
    ) -> Result<()> {
        let record = self.record_path(&self.root, virtual_path)?;

        let source_nzb = if also_delete_nzb {
            self.read(virtual_path)?
                .and_then(|metadata| metadata.source_nzb_path)
        } else {
            None
        };

        match fs::remove_file(&record) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if let Some(nzb) = source_nzb {
            let nzb_path = Path::new(&nzb);
            if nzb_path.is_file()
                && let Err(err) = fs::remove_file(nzb_path)
            {
                warn!("failed to remove source nzb {nzb}: {err}");
            }
        }

        Ok(())
    }

    /// Removes empty directories below `root.join(subdir)` depth-first,
    /// skipping any directory whose basename appears in `protected`.
    /// Symlinks are never followed. Returns how many directories were
    /// removed.
    pub fn cleanup_empty_directories(
        &self,
        subdir: &str,
        protected: &[String],
    ) -> Result<usize> {
        let base = if subdir.is_empty() {
            self.root.clone()
        } else {
            self.record_tree_path(&self.root, subdir)?
        };
        if !base.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        prune_empty_dirs(&base, protected, false, &mut removed)?;
        Ok(removed)
    }

    fn record_path(&self, tree: &Path, virtual_path: &str) -> Result<PathBuf> {
        let mut path = self.record_tree_path(tree, virtual_path)?;
        let file_name = path
            .file_name()
            .map(|name| {
                let mut name = name.to_os_string();
                name.push(".");
                name.push(RECORD_EXTENSION);
                name
            })
            .ok_or_else(|| {
                HealthError::InvalidMetadata(format!(
                    "virtual path {virtual_path:?} has no file name"
                ))
            })?;
        path.set_file_name(file_name);
        Ok(path)
    }

    /// Joins a virtual path onto a tree root, rejecting anything that
    /// would escape the tree.
    fn record_tree_path(&self, tree: &Path, virtual_path: &str) -> Result<PathBuf> {
        let relative = virtual_path.trim_start_matches('/');
        if relative.is_empty() {
            return Err(HealthError::InvalidMetadata(
                "empty virtual path".to_string(),
            ));
        }
        let relative = Path::new(relative);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(HealthError::InvalidMetadata(format!(
                        "virtual path {virtual_path:?} escapes the metadata tree"
                    )));
                }
            }
        }
        Ok(tree.join(relative))
    }
}

/// Depth-first prune. `removable` marks whether the directory itself may be
/// deleted once empty (the tree base never is).
fn prune_empty_dirs(
    dir: &Path,
    protected: &[String],
    removable: bool,
    removed: &mut usize,
) -> Result<bool> {
    let mut has_entries = false;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = fs::symlink_metadata(&path)?.file_type();

        if file_type.is_dir() {
            let basename_protected = path
                .file_name()
                .map(|name| {
                    protected
                        .iter()
                        .any(|candidate| name == candidate.as_str())
                })
                .unwrap_or(false);

            let emptied = prune_empty_dirs(&path, protected, !basename_protected, removed)?;
            if !emptied {
                has_entries = true;
            }
        } else {
            // Files and symlinks (even symlinks to directories) count as
            // content and are left alone.
            has_entries = true;
        }
    }

    if !has_entries && removable {
        match fs::remove_dir(dir) {
            Ok(()) => {
                *removed += 1;
                return Ok(true);
            }
            Err(err) => {
                warn!("failed to remove empty directory {}: {err}", dir.display());
                return Ok(false);
            }
        }
    }

    Ok(false)
}
