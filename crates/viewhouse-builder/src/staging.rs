//! Staging / Ready / Retired Directory Lifecycle
//!
//! Layout per view:
//!
//! ```text
//! mvs/<name>/
//!   manifest.json
//!   staging/<uuid>/   built here, invisible to planners
//!   ready/            the only directory planners read
//!   retired/<ts>-<uuid>/   previous ready dirs, GC'd after a grace period
//! ```
//!
//! Promotion is a two-phase rename on one filesystem: staging renames to
//! `ready.tmp`, the parent directory is fsync'd, the old `ready` (if any)
//! moves to `retired/`, and `ready.tmp` renames into place. A crash at any
//! point leaves either the old ready directory or a recoverable `.tmp`,
//! never a torn view.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

/// Path helpers for one view's directory tree.
#[derive(Debug, Clone)]
pub struct ViewPaths {
    view_dir: PathBuf,
}

impl ViewPaths {
    pub fn new(mvs_root: &Path, name: &str) -> ViewPaths {
        ViewPaths {
            view_dir: mvs_root.join(name),
        }
    }

    pub fn view_dir(&self) -> &Path {
        &self.view_dir
    }

    pub fn ready_dir(&self) -> PathBuf {
        self.view_dir.join("ready")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.view_dir.join("staging")
    }

    pub fn retired_root(&self) -> PathBuf {
        self.view_dir.join("retired")
    }

    /// Allocate a fresh, unique staging directory.
    pub fn new_staging_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.staging_root().join(Uuid::new_v4().simple().to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Atomically promote a staging directory to `ready/`.
    ///
    /// The old ready directory is moved to `retired/` before the new one
    /// becomes visible; it is deleted later by [`gc_retired`], after any
    /// reader still holding the old snapshot has drained.
    pub fn promote(&self, staging: &Path) -> std::io::Result<PathBuf> {
        let tmp = self.view_dir.join("ready.tmp");
        if tmp.exists() {
            // Leftover from an interrupted promotion; safe to discard, the
            // build that created it never registered.
            std::fs::remove_dir_all(&tmp)?;
        }
        std::fs::rename(staging, &tmp)?;
        fsync_dir(&self.view_dir)?;

        let ready = self.ready_dir();
        if ready.exists() {
            let retired = self.retired_root().join(format!(
                "{}-{}",
                chrono::Utc::now().format("%Y%m%dT%H%M%S"),
                Uuid::new_v4().simple()
            ));
            std::fs::create_dir_all(self.retired_root())?;
            std::fs::rename(&ready, &retired)?;
            debug!(retired = %retired.display(), "retired previous ready directory");
        }
        std::fs::rename(&tmp, &ready)?;
        fsync_dir(&self.view_dir)?;
        Ok(ready)
    }

    /// Remove a staging directory after a failed or abandoned build.
    pub fn discard_staging(&self, staging: &Path) {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(staging = %staging.display(), error = %e, "could not discard staging");
            }
        }
    }

    /// Delete staging directories older than `grace`. Returns how many were
    /// removed.
    pub fn gc_staging(&self, grace: Duration) -> usize {
        remove_older_than(&self.staging_root(), grace)
    }

    /// Delete retired ready directories older than `grace`.
    pub fn gc_retired(&self, grace: Duration) -> usize {
        remove_older_than(&self.retired_root(), grace)
    }

    /// Parquet files under ready/, as (relative paths, total bytes).
    pub fn ready_files(&self) -> std::io::Result<(Vec<String>, u64)> {
        let ready = self.ready_dir();
        let mut files = Vec::new();
        let mut bytes = 0u64;
        collect_files(&ready, &ready, &mut files, &mut bytes)?;
        files.sort();
        Ok((files, bytes))
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    files: &mut Vec<String>,
    bytes: &mut u64,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files, bytes)?;
        } else {
            *bytes += entry.metadata()?.len();
            if let Ok(rel) = path.strip_prefix(root) {
                files.push(rel.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

fn remove_older_than(root: &Path, grace: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    let cutoff = SystemTime::now() - grace;
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|mtime| mtime < cutoff)
            .unwrap_or(false);
        if old_enough {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "gc failed"),
            }
        }
    }
    removed
}

/// Durability for directory renames: fsync the parent so the rename itself
/// survives a crash. Never move directories across filesystems.
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}
