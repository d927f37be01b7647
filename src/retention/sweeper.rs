//! Retention sweeper
//!
//! Deletes files in the output directory once they are older than the
//! retention window. Every pass is independent; a file that cannot be deleted
//! is simply tried again on the next pass.
//!
//! There is no coordination with writers. A sink that is still being written
//! and already older than the window will be deleted (or fail to delete and be
//! retried) like any other file.

use super::SweepError;
use std::fs::{self, Metadata};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Result of one pass over the directory
#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    /// Files younger than the window
    pub retained: usize,
    /// Files that vanished between listing and deletion
    pub already_gone: usize,
    pub failures: Vec<SweepError>,
}

/// Creation time, or modification time where the filesystem has no birth time
pub fn creation_time(metadata: &Metadata) -> Option<SystemTime> {
    metadata.created().or_else(|_| metadata.modified()).ok()
}

/// Whether a file created at `created` has outlived `window` at `now`
pub fn is_expired(created: SystemTime, window: Duration, now: SystemTime) -> bool {
    match created.checked_add(window) {
        Some(deadline) => now > deadline,
        None => false,
    }
}

/// One pass: delete every regular file directly in `dir` that expired at `now`
pub fn sweep_directory(dir: &Path, window: Duration, now: SystemTime) -> SweepReport {
    sweep_with(dir, window, now, |path| fs::remove_file(path))
}

/// `sweep_directory` with the deletion step supplied by the caller
pub fn sweep_with<R>(dir: &Path, window: Duration, now: SystemTime, remove: R) -> SweepReport
where
    R: Fn(&Path) -> io::Result<()>,
{
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) => {
            report.failures.push(SweepError::List {
                path: dir.to_path_buf(),
                source,
            });
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                report.failures.push(SweepError::List {
                    path: dir.to_path_buf(),
                    source,
                });
                continue;
            }
        };
        let path = entry.path();

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                report.already_gone += 1;
                continue;
            }
            Err(source) => {
                let failure = SweepError::Metadata { path, source };
                tracing::warn!("{}", failure);
                report.failures.push(failure);
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        let expired = creation_time(&metadata)
            .map(|created| is_expired(created, window, now))
            .unwrap_or(false);
        if !expired {
            report.retained += 1;
            continue;
        }

        match remove(&path) {
            Ok(()) => {
                tracing::info!("Deleted expired file {:?}", path);
                report.deleted.push(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("{:?} already gone", path);
                report.already_gone += 1;
            }
            Err(source) => {
                let failure = SweepError::TransientDelete { path, source };
                tracing::warn!("{}", failure);
                report.failures.push(failure);
            }
        }
    }

    report
}

/// Background task sweeping one directory on a fixed interval
pub struct RetentionSweeper {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl RetentionSweeper {
    /// Start sweeping `dir`. The first pass runs immediately.
    pub fn spawn(dir: PathBuf, window: Duration, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tracing::info!(
            "Retention sweeper started for {:?}: window {}s, every {}ms",
            dir,
            window.as_secs(),
            interval.as_millis()
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut passes = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let pass_dir = dir.clone();
                let report = match tokio::task::spawn_blocking(move || {
                    sweep_directory(&pass_dir, window, SystemTime::now())
                })
                .await
                {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!("Sweep pass panicked: {}", e);
                        continue;
                    }
                };
                passes += 1;

                for failure in &report.failures {
                    if let SweepError::List { .. } = failure {
                        tracing::warn!("{}", failure);
                    }
                }
                tracing::debug!(
                    "Sweep {}: {} deleted, {} retained, {} gone, {} failed",
                    passes,
                    report.deleted.len(),
                    report.retained,
                    report.already_gone,
                    report.failures.len()
                );
            }

            tracing::info!("Retention sweeper stopped after {} passes", passes);
            passes
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the task and wait for it. Returns the number of completed passes.
    pub async fn stop(mut self) -> u64 {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_expired_boundaries() {
        let created = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        let window = Duration::from_secs(10);

        assert!(!is_expired(created, window, created));
        assert!(!is_expired(created, window, created + Duration::from_secs(9)));
        assert!(!is_expired(created, window, created + window));
        assert!(is_expired(created, window, created + Duration::from_millis(10_001)));
        // Clock behind the file's timestamp
        assert!(!is_expired(created, window, SystemTime::UNIX_EPOCH));
    }

    #[test]
    fn test_young_files_are_retained() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("fresh.wav"), b"data").unwrap();

        let report = sweep_directory(dir.path(), Duration::from_secs(3600), SystemTime::now());

        assert!(report.deleted.is_empty());
        assert_eq!(report.retained, 1);
        assert!(dir.path().join("fresh.wav").exists());
    }

    #[test]
    fn test_expired_files_are_deleted_and_second_pass_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.mp4");
        fs::write(&path, b"data").unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);

        let first = sweep_directory(dir.path(), Duration::from_secs(2), later);
        assert_eq!(first.deleted, vec![path.clone()]);
        assert!(!path.exists());

        let second = sweep_directory(dir.path(), Duration::from_secs(2), later);
        assert!(second.deleted.is_empty());
        assert!(second.failures.is_empty());
    }

    #[test]
    fn test_subdirectories_are_skipped() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("inner.wav"), b"x").unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);

        let report = sweep_directory(dir.path(), Duration::from_secs(1), later);

        assert!(report.deleted.is_empty());
        assert!(dir.path().join("nested").join("inner.wav").exists());
    }

    #[test]
    fn test_missing_directory_is_reported_not_fatal() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone");

        let report = sweep_directory(&gone, Duration::from_secs(1), SystemTime::now());

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code(), "SWEEP_LIST_FAILED");
    }

    #[test]
    fn test_failed_delete_is_retried_next_pass() {
        let dir = tempdir().unwrap();
        let busy = dir.path().join("busy.avi");
        let done = dir.path().join("done.wav");
        fs::write(&busy, b"frames").unwrap();
        fs::write(&done, b"samples").unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);

        let first = sweep_with(dir.path(), Duration::from_secs(1), later, |path| {
            if path == busy.as_path() {
                Err(io::Error::new(ErrorKind::PermissionDenied, "file in use"))
            } else {
                fs::remove_file(path)
            }
        });

        assert_eq!(first.deleted, vec![done.clone()]);
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].code(), "TRANSIENT_DELETE_FAILURE");
        assert!(busy.exists());
        assert!(!done.exists());

        let second = sweep_directory(dir.path(), Duration::from_secs(1), later);
        assert_eq!(second.deleted, vec![busy.clone()]);
        assert!(second.failures.is_empty());
        assert!(!busy.exists());
    }

    #[test]
    fn test_file_vanishing_before_delete_is_not_a_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raced.mp4");
        fs::write(&path, b"data").unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);

        let report = sweep_with(dir.path(), Duration::from_secs(1), later, |path| {
            // Another deleter gets there first
            fs::remove_file(path)?;
            fs::remove_file(path)
        });

        assert_eq!(report.already_gone, 1);
        assert!(report.deleted.is_empty());
        assert!(report.failures.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sweeper_stop_joins_task() {
        let dir = tempdir().unwrap();
        let sweeper = RetentionSweeper::spawn(
            dir.path().to_path_buf(),
            Duration::from_secs(60),
            Duration::from_millis(10),
        );
        assert!(sweeper.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let passes = sweeper.stop().await;
        assert!(passes >= 1);
    }
}
