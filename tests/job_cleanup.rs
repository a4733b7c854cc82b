//! Temporary-artifact lifecycle: cleanup is unconditional, idempotent, and
//! never touches user-supplied thumbnail overrides.

use std::path::Path;
use tg_courier::transfer::metadata::user_thumbnail;
use tg_courier::transfer::JobArtifacts;

#[tokio::test]
async fn cleanup_removes_all_tracked_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let download = dir.path().join("a1b2.mp4");
    let thumb = dir.path().join("a1b2.thumb.jpg");
    tokio::fs::write(&download, b"video").await.expect("write");
    tokio::fs::write(&thumb, b"frame").await.expect("write");

    let mut artifacts = JobArtifacts::default();
    artifacts.track_download(download.clone());
    artifacts.track_thumbnail(thumb.clone());
    artifacts.cleanup().await;

    assert!(!download.exists());
    assert!(!thumb.exists());
}

#[tokio::test]
async fn cleanup_covers_every_failure_point_after_creation() {
    let dir = tempfile::tempdir().expect("tempdir");

    // Failure right after the download path was tracked but before any
    // bytes arrived: the file does not exist yet.
    let mut early = JobArtifacts::default();
    early.track_download(dir.path().join("never-written.bin"));
    early.cleanup().await;

    // Failure after download completed but before the thumbnail stage.
    let download = dir.path().join("partial.bin");
    tokio::fs::write(&download, b"data").await.expect("write");
    let mut mid = JobArtifacts::default();
    mid.track_download(download.clone());
    mid.cleanup().await;
    assert!(!download.exists());

    // Failure during upload, with both artifacts on disk.
    let download = dir.path().join("full.bin");
    let thumb = dir.path().join("full.thumb.jpg");
    tokio::fs::write(&download, b"data").await.expect("write");
    tokio::fs::write(&thumb, b"jpg").await.expect("write");
    let mut late = JobArtifacts::default();
    late.track_download(download.clone());
    late.track_thumbnail(thumb.clone());
    late.cleanup().await;
    assert!(!download.exists());
    assert!(!thumb.exists());
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let download = dir.path().join("once.bin");
    tokio::fs::write(&download, b"data").await.expect("write");

    let mut artifacts = JobArtifacts::default();
    artifacts.track_download(download.clone());
    artifacts.cleanup().await;
    artifacts.cleanup().await;
    assert!(!download.exists());
}

#[tokio::test]
async fn user_thumbnail_override_is_never_a_tracked_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let own = dir.path().join("42.jpg");
    tokio::fs::write(&own, b"jpg").await.expect("write");

    // The pipeline consults the override without registering it for
    // cleanup; deleting job artifacts must leave it in place.
    let found = user_thumbnail(dir.path(), 42).expect("override found");
    assert_eq!(found, own);

    let mut artifacts = JobArtifacts::default();
    artifacts.track_download(dir.path().join("dl.bin"));
    artifacts.cleanup().await;

    assert!(own.exists());
    assert!(user_thumbnail(Path::new(dir.path()), 42).is_some());
}
