use avrec::retention::{sweep_directory, RetentionSweeper};
use std::fs;
use std::time::{Duration, Instant, SystemTime};
use tempfile::tempdir;

#[tokio::test]
async fn test_sweeper_deletes_file_after_window() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("memo.wav");
    fs::write(&path, b"RIFF").unwrap();

    let sweeper = RetentionSweeper::spawn(
        dir.path().to_path_buf(),
        Duration::from_secs(1),
        Duration::from_millis(50),
    );

    // Still inside the window
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(path.exists());

    let deadline = Instant::now() + Duration::from_secs(5);
    while path.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!path.exists());
    assert!(sweeper.is_running());

    sweeper.stop().await;
}

#[tokio::test]
async fn test_sweeper_keeps_running_after_directory_vanishes() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("recordings");
    fs::create_dir(&target).unwrap();

    let sweeper = RetentionSweeper::spawn(
        target.clone(),
        Duration::from_secs(1),
        Duration::from_millis(10),
    );

    fs::remove_dir(&target).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(sweeper.is_running());

    let passes = sweeper.stop().await;
    assert!(passes > 1);
}

#[test]
fn test_back_to_back_sweeps_are_idempotent() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.avi"), b"a").unwrap();
    fs::write(dir.path().join("b.wav"), b"b").unwrap();
    let now = SystemTime::now() + Duration::from_secs(10);

    let first = sweep_directory(dir.path(), Duration::from_secs(1), now);
    let second = sweep_directory(dir.path(), Duration::from_secs(1), now);

    assert_eq!(first.deleted.len(), 2);
    assert!(first.failures.is_empty());
    assert!(second.deleted.is_empty());
    assert!(second.failures.is_empty());
    assert_eq!(second.retained, 0);
}

#[test]
fn test_only_expired_files_are_deleted() {
    let dir = tempdir().unwrap();
    let old = dir.path().join("old.mp4");
    fs::write(&old, b"old").unwrap();
    let created = fs::metadata(&old)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap();

    let window = Duration::from_secs(30);
    let before = sweep_directory(dir.path(), window, created + Duration::from_secs(29));
    assert!(before.deleted.is_empty());
    assert_eq!(before.retained, 1);

    let after = sweep_directory(dir.path(), window, created + Duration::from_secs(31));
    assert_eq!(after.deleted, vec![old]);
}
