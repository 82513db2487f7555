//! Log file housekeeping and build info.
//!
//! Logs are written by `tracing-appender` as daily files named `pos.YYYY-MM-DD`
//! under `<data_dir>/logs`; see [`crate::init_logging`].

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix passed to the rolling appender.
pub const LOG_FILE_PREFIX: &str = "pos";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
}

pub fn about() -> AboutInfo {
    AboutInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_sha: env!("BUILD_GIT_SHA"),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    }
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

fn is_log_file(name: &str) -> bool {
    name == LOG_FILE_PREFIX
        || name
            .strip_prefix(LOG_FILE_PREFIX)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
/// Returns the number of files removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_log_file))
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn about_reports_package_version() {
        let info = about();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.git_sha.is_empty());
        let json = serde_json::to_value(&info).expect("serialize");
        assert!(json.get("gitSha").is_some());
    }

    #[test]
    fn log_dir_lives_under_data_dir() {
        let data = Path::new("/var/lib/pos");
        assert_eq!(log_dir(data), PathBuf::from("/var/lib/pos/logs"));
    }

    #[test]
    fn prune_keeps_newest_log_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        for day in 1..=13 {
            fs::write(dir.path().join(format!("pos.2026-01-{day:02}")), "x").expect("write");
        }
        fs::write(dir.path().join("pos-settings.json"), "{}").expect("write");
        fs::write(dir.path().join("notes.txt"), "keep").expect("write");

        assert_eq!(prune_old_logs(dir.path()), 3);

        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read")
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        assert_eq!(names.iter().filter(|n| n.starts_with("pos.")).count(), MAX_LOG_FILES);
        assert!(names.iter().any(|n| n == "notes.txt"));
        assert!(names.iter().any(|n| n == "pos-settings.json"));
    }

    #[test]
    fn prune_tolerates_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(prune_old_logs(&dir.path().join("absent")), 0);
    }
}
