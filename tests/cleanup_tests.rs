//! Integration tests for the age-based cleanup sweep.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use connkit::cleanup::{SECONDS_PER_DAY, cleanup, cleanup_at, cleanup_paths, remove_path};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(SECONDS_PER_DAY);

fn now_whole_seconds() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn touch(path: &Path, modified: SystemTime) {
    let file = File::create(path).unwrap();
    file.set_modified(modified).unwrap();
}

fn age_dir(path: &Path, modified: SystemTime) {
    File::open(path).unwrap().set_modified(modified).unwrap();
}

#[test]
fn test_thirty_day_retention() {
    let dir = TempDir::new().unwrap();
    let now = now_whole_seconds();
    touch(&dir.path().join("old.log"), now - DAY * 40);
    touch(&dir.path().join("new.log"), now - DAY);

    let report = cleanup(30, dir.path()).unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.kept, 1);
    assert!(!dir.path().join("old.log").exists());
    assert!(dir.path().join("new.log").exists());
}

#[test]
fn test_old_directories_removed_recursively() {
    let dir = TempDir::new().unwrap();
    let now = now_whole_seconds();

    let old_dir = dir.path().join("2023-run");
    fs::create_dir_all(old_dir.join("nested")).unwrap();
    touch(&old_dir.join("nested").join("trace.log"), now);
    age_dir(&old_dir, now - DAY * 90);

    let new_dir = dir.path().join("current");
    fs::create_dir(&new_dir).unwrap();
    touch(&new_dir.join("stale.log"), now - DAY * 90);

    let report = cleanup_at(30, dir.path(), now, remove_path).unwrap();

    assert_eq!(report.removed, 1);
    assert!(!old_dir.exists());
    // Only direct children are judged; a fresh directory keeps old content.
    assert!(new_dir.join("stale.log").exists());
}

#[test]
fn test_removal_failure_does_not_stop_sweep() {
    let dir = TempDir::new().unwrap();
    let now = now_whole_seconds();
    for name in ["a.log", "b.log", "c.log"] {
        touch(&dir.path().join(name), now - DAY * 31);
    }

    let report = cleanup_at(30, dir.path(), now, |path| {
        if path.ends_with("b.log") {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
        } else {
            remove_path(path)
        }
    })
    .unwrap();

    assert_eq!(report.removed, 2);
    assert_eq!(report.failed, 1);
    assert!(dir.path().join("b.log").exists());
    assert!(!dir.path().join("a.log").exists());
    assert!(!dir.path().join("c.log").exists());
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(cleanup(30, &dir.path().join("absent")).is_err());
}

#[test]
fn test_cleanup_paths_skips_missing_directories() {
    let base = TempDir::new().unwrap();
    let logs = base.path().join("logs");
    fs::create_dir(&logs).unwrap();
    touch(&logs.join("ldap_conn_20200101.log"), SystemTime::UNIX_EPOCH + DAY);

    let report = cleanup_paths(30, base.path(), &["logs", "missing"]);

    assert_eq!(report.removed, 1);
    assert_eq!(report.failed, 0);
    assert!(fs::read_dir(&logs).unwrap().next().is_none());
}
