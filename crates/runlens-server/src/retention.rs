// SPDX-License-Identifier: Apache-2.0

//! Age-based cleanup of extracted reports.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedReport {
    pub name: String,
    pub age_secs: u64,
    pub has_entry_point: bool,
}

fn age_of(path: &Path, now: SystemTime) -> std::io::Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    // Clock skew can put mtime in the future; treat that as brand new.
    Ok(now.duration_since(modified).unwrap_or(Duration::ZERO))
}

/// Deletes every entry directly under `root` whose last-modified time is
/// older than `max_age`. A missing root is an empty sweep. One failing entry
/// does not stop the rest.
pub fn sweep_reports(root: &Path, max_age: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.errors.push(format!("{}: {e}", root.display()));
            return report;
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.errors.push(format!("{}: {e}", root.display()));
                continue;
            }
        };
        report.scanned += 1;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let age = match age_of(&path, now) {
            Ok(age) => age,
            Err(e) => {
                report.errors.push(format!("{name}: {e}"));
                continue;
            }
        };
        if age <= max_age {
            continue;
        }
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => report.deleted.push(name),
            Err(e) => report.errors.push(format!("{name}: {e}")),
        }
    }
    report.deleted.sort();
    report
}

/// Lists what is currently extracted under `root`, oldest first.
pub fn list_persisted_reports(
    root: &Path,
    entry_point: &str,
    now: SystemTime,
) -> std::io::Result<Vec<PersistedReport>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        out.push(PersistedReport {
            name: entry.file_name().to_string_lossy().into_owned(),
            age_secs: age_of(&path, now)?.as_secs(),
            has_entry_point: path.join(entry_point).is_file(),
        });
    }
    out.sort_by(|a, b| b.age_secs.cmp(&a.age_secs).then(a.name.cmp(&b.name)));
    Ok(out)
}

/// Runs [`sweep_reports`] every `interval` on the blocking pool.
pub fn spawn_retention_sweeper(
    root: PathBuf,
    max_age: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let root = root.clone();
            let swept = tokio::task::spawn_blocking(move || {
                sweep_reports(&root, max_age, SystemTime::now())
            })
            .await;
            match swept {
                Ok(report) => {
                    for err in &report.errors {
                        warn!(error = %err, "report sweep entry failed");
                    }
                    info!(
                        scanned = report.scanned,
                        deleted = report.deleted.len(),
                        errors = report.errors.len(),
                        "report sweep finished"
                    );
                }
                Err(e) => error!(error = %e, "report sweep task failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletes_only_entries_past_max_age() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("101")).expect("old");
        fs::write(tmp.path().join("101/index.html"), b"x").expect("old index");
        fs::create_dir_all(tmp.path().join("202")).expect("new");

        let max_age = Duration::from_secs(24 * 60 * 60);
        let now = SystemTime::now();
        let report = sweep_reports(tmp.path(), max_age, now);
        assert_eq!(report.scanned, 2);
        assert!(report.deleted.is_empty());

        let later = now + Duration::from_secs(25 * 60 * 60);
        let report = sweep_reports(tmp.path(), max_age, later);
        assert_eq!(report.deleted, vec!["101".to_string(), "202".to_string()]);
        assert!(report.errors.is_empty());
        assert!(!tmp.path().join("101").exists());
    }

    #[test]
    fn missing_root_is_an_empty_sweep() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let report = sweep_reports(
            &tmp.path().join("never-created"),
            Duration::from_secs(1),
            SystemTime::now(),
        );
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn lists_reports_with_entry_point_flag() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("1")).expect("dir");
        fs::write(tmp.path().join("1/index.html"), b"x").expect("index");
        fs::create_dir_all(tmp.path().join("2")).expect("dir");
        let listed =
            list_persisted_reports(tmp.path(), "index.html", SystemTime::now()).expect("list");
        assert_eq!(listed.len(), 2);
        let one = listed.iter().find(|r| r.name == "1").expect("1");
        assert!(one.has_entry_point);
        let two = listed.iter().find(|r| r.name == "2").expect("2");
        assert!(!two.has_entry_point);
    }
}
