//! Age-based cleanup of files and directories.
//!
//! Removes the direct children of a directory whose modification time is
//! older than a retention window. The sweep is best effort: a child that
//! cannot be inspected or removed is logged and skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Seconds in one retention day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Summary of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Children removed.
    pub removed: u32,
    /// Eligible children that could not be inspected or removed.
    pub failed: u32,
    /// Children newer than the cutoff.
    pub kept: u32,
}

/// Removes `path`, recursively if it is a directory.
///
/// # Errors
/// Returns error if the path cannot be removed.
pub fn remove_path(path: &Path) -> io::Result<()> {
    // symlink_metadata so a link to a directory is unlinked, not followed
    if fs::symlink_metadata(path)?.is_dir() {
        debug!("It's a directory, removing all subdirs of {}", path.display());
        fs::remove_dir_all(path)
    } else {
        debug!("It's not a directory, removing {}", path.display());
        fs::remove_file(path)
    }
}

/// Returns the instant before which children are eligible for removal.
#[must_use]
pub fn cutoff(retention_days: u64, now: SystemTime) -> SystemTime {
    let window = Duration::from_secs(retention_days.saturating_mul(SECONDS_PER_DAY));
    now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Removes children of `path` older than `retention_days` days.
///
/// # Errors
/// Returns error only if `path` itself cannot be listed.
pub fn cleanup(retention_days: u64, path: &Path) -> io::Result<CleanupReport> {
    cleanup_at(retention_days, path, SystemTime::now(), remove_path)
}

/// Sweep with an explicit clock and removal function.
///
/// A child is removed when its modification time is strictly before
/// `now - retention_days`.
///
/// # Errors
/// Returns error only if `path` itself cannot be listed.
pub fn cleanup_at<F>(
    retention_days: u64,
    path: &Path,
    now: SystemTime,
    mut remove: F,
) -> io::Result<CleanupReport>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    debug!(
        "Cleanup started, removing everything older than [{}] days from [{}]",
        retention_days,
        path.display()
    );

    let cutoff = cutoff(retention_days, now);
    let mut report = CleanupReport::default();

    for entry in fs::read_dir(path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Unable to read entry in {}: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };
        let item = entry.path();

        let modified = match fs::symlink_metadata(&item).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Unable to stat {}, Reason: [{}]", item.display(), e);
                report.failed += 1;
                continue;
            }
        };

        if modified >= cutoff {
            report.kept += 1;
            continue;
        }

        debug!("item: {}, modified: {:?}", item.display(), modified);
        match remove(&item) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Unable to remove {}, Reason: [{}]", item.display(), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Cleanup of {} finished: {} removed, {} failed, {} kept",
        path.display(),
        report.removed,
        report.failed,
        report.kept
    );
    Ok(report)
}

/// Sweeps each `base/name` directory in turn.
///
/// A directory that cannot be listed is logged and skipped.
pub fn cleanup_paths(retention_days: u64, base: &Path, names: &[&str]) -> CleanupReport {
    let mut total = CleanupReport::default();
    info!("Cleaning process to free space from dirs {:?}", names);

    for name in names {
        let dir: PathBuf = base.join(name);
        match cleanup(retention_days, &dir) {
            Ok(report) => {
                total.removed += report.removed;
                total.failed += report.failed;
                total.kept += report.kept;
            }
            Err(e) => warn!("Unable to clean {}: {}", dir.display(), e),
        }
    }

    total
}
