//! Job preprocessing: download, gate, and (for videos) extract frames.
//!
//! Jobs that fail acquisition are skipped and simply absent from the output.
//! Videos that pass acquisition but fail extraction or the readiness wait are
//! kept with `error` set so the failure is reported for that job alone.

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ScanConfig;
use crate::constants::{VIDEO_FILE_STEM, is_image_extension, is_video_extension};
use crate::error::PipelineError;
use crate::frames::barrier::{marker_path, wait_for_marker};
use crate::frames::extract_video_frames;
use crate::frames::ffmpeg::{VideoProbe, probe_video};
use crate::models::{ImageDescriptor, Job, VideoDescriptor, VideoMetadata, round_to};
use crate::round::Round;
use crate::storage::{Downloader, dotted_extension};

pub struct Preprocessor {
    config: Arc<ScanConfig>,
    downloader: Arc<dyn Downloader>,
}

impl Preprocessor {
    pub fn new(config: Arc<ScanConfig>, downloader: Arc<dyn Downloader>) -> Self {
        Self { config, downloader }
    }

    /// Download every image job into the round's images directory.
    pub async fn images(&self, round: &Round, jobs: &[Job]) -> Result<Vec<ImageDescriptor>, PipelineError> {
        let images_dir = round.images_dir();
        tokio::fs::create_dir_all(&images_dir).await?;

        let mut descriptors = Vec::with_capacity(jobs.len());
        for job in jobs {
            let Some(path) = self
                .downloader
                .download(&job.url, &images_dir, Some(&job.job_id), self.config.max_image_bytes)
                .await
            else {
                log::warn!("[preprocess] Skipping image {}: download failed", job.job_id);
                continue;
            };

            let ext = dotted_extension(&path);
            if !is_image_extension(&ext) {
                log::warn!("[preprocess] Skipping image {}: extension {:?} not allowed", job.job_id, ext);
                remove_quietly(&path).await;
                continue;
            }

            descriptors.push(ImageDescriptor {
                job_id: job.job_id.clone(),
                image_path: path,
            });
        }

        log::info!("[preprocess] {}/{} images accepted", descriptors.len(), jobs.len());
        Ok(descriptors)
    }

    /// Process video jobs with bounded concurrency. Output keeps request order.
    pub async fn videos(&self, round: &Round, jobs: &[Job]) -> Vec<VideoDescriptor> {
        let descriptors: Vec<VideoDescriptor> = stream::iter(jobs.iter().cloned())
            .map(|job| async move { self.video(round, &job).await })
            .buffered(self.config.video_concurrency.max(1))
            .filter_map(futures::future::ready)
            .collect()
            .await;

        log::info!("[preprocess] {}/{} videos accepted", descriptors.len(), jobs.len());
        descriptors
    }

    async fn video(&self, round: &Round, job: &Job) -> Option<VideoDescriptor> {
        let job_dir = round.video_dir(&job.job_id);
        if let Err(e) = tokio::fs::create_dir_all(&job_dir).await {
            log::warn!("[preprocess] Skipping video {}: {}", job.job_id, e);
            return None;
        }

        let path = self
            .downloader
            .download(&job.url, &job_dir, Some(VIDEO_FILE_STEM), self.config.max_video_bytes)
            .await;
        let Some(path) = path else {
            log::warn!("[preprocess] Skipping video {}: download failed", job.job_id);
            return None;
        };

        let ext = dotted_extension(&path);
        if !is_video_extension(&ext) {
            log::warn!("[preprocess] Skipping video {}: extension {:?} not allowed", job.job_id, ext);
            remove_quietly(&path).await;
            return None;
        }

        let probe = match probe_video(&path).await {
            Ok(probe) => probe,
            Err(e) => {
                log::warn!("[preprocess] Skipping video {}: {}", job.job_id, e);
                return None;
            }
        };
        if let Err(reason) = admit_video(&probe, self.config.max_video_duration_secs) {
            log::warn!("[preprocess] Skipping video {}: {}", job.job_id, reason);
            return None;
        }

        let metadata = video_metadata(&path, &probe).await;
        let (frame_paths, error) = match self.extract(&path, &job_dir, &probe).await {
            Ok(frames) => (frames, None),
            Err(e) => {
                log::error!("[preprocess] Video {} failed: {}", job.job_id, e);
                (Vec::new(), Some(e.to_string()))
            }
        };

        Some(VideoDescriptor {
            job_id: job.job_id.clone(),
            frame_paths,
            metadata,
            error,
        })
    }

    /// Extract frames, then block on the readiness marker before handing them out.
    async fn extract(&self, video: &Path, job_dir: &Path, probe: &VideoProbe) -> Result<Vec<PathBuf>, PipelineError> {
        let frames = extract_video_frames(video, job_dir, probe, &self.config.extraction).await?;
        let marker = wait_for_marker(&marker_path(job_dir), self.config.ready_wait).await?;
        log::info!(
            "[preprocess] {} ready: {} frames in {}s",
            job_dir.display(),
            marker.total_frames,
            marker.time_elapsed
        );
        Ok(frames)
    }
}

/// Cheap rejects applied before any extraction work
pub fn admit_video(probe: &VideoProbe, max_duration_secs: f64) -> Result<(), String> {
    if !probe.fps.is_finite() || probe.fps <= 0.0 {
        return Err(format!("invalid fps {}", probe.fps));
    }
    if probe.frame_count == 0 {
        return Err("no frames".to_string());
    }
    let duration = probe.duration_secs();
    if duration > max_duration_secs {
        return Err(format!(
            "duration {:.2}s exceeds {:.0}s limit",
            duration, max_duration_secs
        ));
    }
    Ok(())
}

async fn video_metadata(path: &Path, probe: &VideoProbe) -> VideoMetadata {
    let size_bytes = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    VideoMetadata {
        width: probe.width,
        height: probe.height,
        duration: round_to(probe.duration_secs(), 2),
        fps: round_to(probe.fps, 2),
        size_mb: bytes_to_mb(size_bytes),
        original_filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Megabytes (2^20) rounded to two decimals
pub fn bytes_to_mb(bytes: u64) -> f64 {
    round_to(bytes as f64 / (1024.0 * 1024.0), 2)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        log::warn!("[preprocess] Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::collections::HashMap;

    /// Serves in-memory bodies keyed by URL; unknown URLs fail like a 404.
    #[derive(Default)]
    pub(crate) struct StubDownloader {
        pub bodies: HashMap<String, Vec<u8>>,
    }

    impl StubDownloader {
        pub fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.bodies.insert(url.to_string(), body.to_vec());
            self
        }
    }

    impl Downloader for StubDownloader {
        fn download<'a>(
            &'a self,
            url: &'a str,
            dest_dir: &'a Path,
            filename: Option<&'a str>,
            max_bytes: u64,
        ) -> BoxFuture<'a, Option<PathBuf>> {
            Box::pin(async move {
                let body = self.bodies.get(url)?;
                if body.len() as u64 > max_bytes {
                    return None;
                }
                let ext = Path::new(url)
                    .extension()
                    .and_then(|e| e.to_str())
                    .filter(|e| is_image_extension(&format!(".{e}")) || is_video_extension(&format!(".{e}")))
                    .map(|e| format!(".{e}"))
                    .unwrap_or_else(|| ".bin".to_string());
                let path = dest_dir.join(format!("{}{}", filename.unwrap_or("file"), ext));
                tokio::fs::write(&path, body).await.ok()?;
                Some(path)
            })
        }
    }

    fn job(id: &str, url: &str) -> Job {
        Job {
            job_id: id.to_string(),
            url: url.to_string(),
        }
    }

    fn preprocessor(downloader: StubDownloader) -> Preprocessor {
        Preprocessor::new(Arc::new(ScanConfig::default()), Arc::new(downloader))
    }

    #[tokio::test]
    async fn test_images_skip_failed_and_disallowed_downloads() {
        let base = tempfile::tempdir().unwrap();
        let round = Round::open(base.path()).await.unwrap();
        let pre = preprocessor(
            StubDownloader::default()
                .with("https://cdn.test/a.jpg", b"jpeg")
                .with("https://cdn.test/c.exe", b"binary"),
        );

        let jobs = vec![
            job("a", "https://cdn.test/a.jpg"),
            job("b", "https://cdn.test/missing.png"),
            job("c", "https://cdn.test/c.exe"),
        ];
        let descriptors = pre.images(&round, &jobs).await.unwrap();

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].job_id, "a");
        assert_eq!(descriptors[0].image_path, round.images_dir().join("a.jpg"));
        assert!(!round.images_dir().join("c.bin").exists());
    }

    #[tokio::test]
    async fn test_images_respect_size_ceiling() {
        let base = tempfile::tempdir().unwrap();
        let round = Round::open(base.path()).await.unwrap();
        let config = ScanConfig {
            max_image_bytes: 4,
            ..ScanConfig::default()
        };
        let pre = Preprocessor::new(
            Arc::new(config),
            Arc::new(StubDownloader::default().with("https://cdn.test/big.jpg", b"too large")),
        );
        let descriptors = pre
            .images(&round, &[job("big", "https://cdn.test/big.jpg")])
            .await
            .unwrap();
        assert!(descriptors.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_video_is_skipped_without_staging() {
        let base = tempfile::tempdir().unwrap();
        let round = Round::open(base.path()).await.unwrap();
        let pre = preprocessor(
            StubDownloader::default()
                .with("https://cdn.test/broken.mp4", b"not a video")
                .with("https://cdn.test/page.html", b"<html>"),
        );

        let jobs = vec![
            job("broken", "https://cdn.test/broken.mp4"),
            job("html", "https://cdn.test/page.html"),
            job("gone", "https://cdn.test/gone.mp4"),
        ];
        let descriptors = pre.videos(&round, &jobs).await;

        assert!(descriptors.is_empty());
        let broken_dir = round.video_dir("broken");
        assert!(!broken_dir.join("scene").exists());
        assert!(!broken_dir.join("final").exists());
        assert!(!round.video_dir("html").join("video.bin").exists());
    }

    #[test]
    fn test_admit_video_rejects_before_extraction() {
        let probe = |fps: f64, frame_count: u64| VideoProbe {
            width: 640,
            height: 360,
            fps,
            frame_count,
        };
        assert!(admit_video(&probe(30.0, 9000), 300.0).is_ok());
        assert!(admit_video(&probe(30.0, 9030), 300.0).is_err()); // 301s
        assert!(admit_video(&probe(0.0, 100), 300.0).is_err());
        assert!(admit_video(&probe(f64::NAN, 100), 300.0).is_err());
        assert!(admit_video(&probe(25.0, 0), 300.0).is_err());
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
        assert_eq!(bytes_to_mb(1_572_864), 1.5);
    }
}
