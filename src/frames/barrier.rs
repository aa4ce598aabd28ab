//! Readiness barrier between extraction and scanning.
//!
//! The producer confirms every final frame is stat-able, then writes
//! `done.json` atomically. The consumer polls for the marker with a deadline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;

use crate::config::{RetryPolicy, WaitPolicy};
use crate::constants::DONE_MARKER;
use crate::error::PipelineError;

/// Contents of `done.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessMarker {
    pub total_frames: usize,
    pub output_dir: String,
    pub final_dir: String,
    pub time_elapsed: f64,
    pub timestamp: String,
}

pub fn marker_path(output_dir: &Path) -> PathBuf {
    output_dir.join(DONE_MARKER)
}

/// Paths that are not stat-able right now
async fn missing_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    for path in paths {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            missing.push(path.clone());
        }
    }
    missing
}

/// Check that every path exists, re-checking the stragglers up to
/// `policy.attempts` times. Returns the paths still missing on failure.
pub async fn await_paths(paths: &[PathBuf], policy: RetryPolicy) -> Result<(), Vec<PathBuf>> {
    let mut missing = missing_paths(paths).await;
    let mut attempt = 0;
    while !missing.is_empty() && attempt < policy.attempts {
        attempt += 1;
        log::debug!(
            "[frames] {} path(s) not on disk yet, retry {}/{}",
            missing.len(),
            attempt,
            policy.attempts
        );
        tokio::time::sleep(policy.interval).await;
        missing = missing_paths(&missing).await;
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

/// Producer side: every claimed frame must be readable before the marker is written.
pub async fn confirm_frames_on_disk(
    paths: &[PathBuf],
    policy: RetryPolicy,
) -> Result<(), PipelineError> {
    await_paths(paths, policy)
        .await
        .map_err(|missing| PipelineError::FramesMissing { missing })
}

/// Write the marker through a temp file + rename so readers never see a partial file.
pub async fn write_marker(output_dir: &Path, marker: &ReadinessMarker) -> Result<PathBuf, PipelineError> {
    let path = marker_path(output_dir);
    let tmp = output_dir.join(format!(".{}.tmp", DONE_MARKER));
    let body = serde_json::to_vec_pretty(marker).map_err(std::io::Error::other)?;

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&body).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, &path).await?;

    log::info!(
        "[frames] Ready: {} frames in {} ({}s)",
        marker.total_frames,
        marker.final_dir,
        marker.time_elapsed
    );
    Ok(path)
}

/// Consumer side: poll for `path` until it appears or the wait times out.
pub async fn wait_for_marker(path: &Path, policy: WaitPolicy) -> Result<ReadinessMarker, PipelineError> {
    let started = Instant::now();
    loop {
        match tokio::fs::read(path).await {
            Ok(raw) => {
                return serde_json::from_slice(&raw).map_err(|source| PipelineError::MarkerParse {
                    path: path.to_path_buf(),
                    source,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(PipelineError::ReadinessTimeout {
                path: path.to_path_buf(),
                waited,
            });
        }
        tokio::time::sleep(policy.poll_interval.min(policy.timeout - waited)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick_wait(timeout_ms: u64) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(20),
        }
    }

    fn marker(dir: &Path, total: usize) -> ReadinessMarker {
        ReadinessMarker {
            total_frames: total,
            output_dir: dir.display().to_string(),
            final_dir: dir.join("final").display().to_string(),
            time_elapsed: 1.23,
            timestamp: "2026-01-01 00:00:00".into(),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let err = wait_for_marker(&marker_path(dir.path()), quick_wait(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReadinessTimeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_sees_marker_written_mid_wait() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_path_buf();
        let expected = marker(&out, 0);

        let writer = {
            let out = out.clone();
            let expected = expected.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                write_marker(&out, &expected).await.unwrap();
            })
        };

        let read = wait_for_marker(&marker_path(&out), quick_wait(2_000)).await.unwrap();
        writer.await.unwrap();
        assert_eq!(read, expected);
        assert!(!out.join(".done.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_invalid_marker_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(marker_path(dir.path()), b"{not json").unwrap();
        let err = wait_for_marker(&marker_path(dir.path()), quick_wait(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MarkerParse { .. }));
    }

    #[tokio::test]
    async fn test_confirm_reports_missing_frames() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.jpg");
        std::fs::write(&present, b"a").unwrap();
        let absent = dir.path().join("b.jpg");

        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let err = confirm_frames_on_disk(&[present.clone(), absent.clone()], policy)
            .await
            .unwrap_err();
        match err {
            PipelineError::FramesMissing { missing } => assert_eq!(missing, vec![absent]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_await_paths_tolerates_late_flush() {
        let dir = tempfile::tempdir().unwrap();
        let late = dir.path().join("late.jpg");
        let writer = {
            let late = late.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tokio::fs::write(&late, b"x").await.unwrap();
            })
        };
        let policy = RetryPolicy::new(10, Duration::from_millis(25));
        assert!(await_paths(&[late], policy).await.is_ok());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_marker_count_never_exceeds_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let final_dir = dir.path().join("final");
        std::fs::create_dir_all(&final_dir).unwrap();
        let frames: Vec<PathBuf> = (0..3)
            .map(|i| {
                let p = final_dir.join(format!("{i}.jpg"));
                std::fs::write(&p, [i as u8]).unwrap();
                p
            })
            .collect();

        confirm_frames_on_disk(&frames, RetryPolicy::flush()).await.unwrap();
        write_marker(dir.path(), &marker(dir.path(), frames.len()))
            .await
            .unwrap();

        let read = wait_for_marker(&marker_path(dir.path()), quick_wait(500))
            .await
            .unwrap();
        let on_disk = std::fs::read_dir(&final_dir).unwrap().count();
        assert!(read.total_frames <= on_disk);
    }
}
