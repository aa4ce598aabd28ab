//! Request orchestration.
//!
//! Validation, then a round bracketing preprocessing, scanning and
//! aggregation. The round is removed whatever the outcome.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ClassifierKind, ScanConfig};
use crate::content_filter::{Classifier, NoOpClassifier, NsfwClassifier};
use crate::error::PipelineError;
use crate::models::{AnalyzeRequest, AnalyzeResponse, AnalyzeResults, MediaKind, VideoDescriptor, VideoVerdict};
use crate::preprocess::Preprocessor;
use crate::round::Round;
use crate::scan::scan_frames;
use crate::storage::{Downloader, HttpDownloader};
use crate::validate::validate;
use crate::verdict::{aggregate_video, image_verdicts};

pub struct ScanEngine {
    config: Arc<ScanConfig>,
    classifier: Arc<dyn Classifier>,
    preprocessor: Preprocessor,
}

impl ScanEngine {
    pub fn new(config: ScanConfig, classifier: Arc<dyn Classifier>, downloader: Arc<dyn Downloader>) -> Self {
        let config = Arc::new(config);
        Self {
            preprocessor: Preprocessor::new(config.clone(), downloader),
            config,
            classifier,
        }
    }

    /// Build the production engine: HTTP downloader plus the configured classifier.
    /// Loads model weights, so call it off the async runtime.
    pub fn from_config(config: ScanConfig) -> anyhow::Result<Self> {
        let downloader = Arc::new(HttpDownloader::new(config.download_timeout)?);
        let classifier = build_classifier(&config)?;
        Ok(Self::new(config, classifier, downloader))
    }

    /// Run a request and wrap the outcome in the status envelope.
    pub async fn handle(&self, request: Value) -> AnalyzeResponse {
        match self.analyze(&request).await {
            Ok(results) => AnalyzeResponse::Success { results },
            Err(e) => {
                log::error!("[engine] Request failed: {}", e);
                AnalyzeResponse::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Like `handle`, but on its own task so a panic still yields an envelope.
    pub async fn handle_isolated(self: Arc<Self>, request: Value) -> AnalyzeResponse {
        match tokio::spawn(async move { self.handle(request).await }).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("[engine] Request task panicked: {}", e);
                AnalyzeResponse::Error {
                    message: "Internal error".to_string(),
                }
            }
        }
    }

    pub async fn analyze(&self, request: &Value) -> Result<AnalyzeResults, PipelineError> {
        let request = validate(request)?;
        let round = Round::open(&self.config.base_dir).await?;
        log::info!(
            "[engine] Round {}: {} {} job(s)",
            round.id(),
            request.jobs.len(),
            request.kind.as_str()
        );

        let result = match request.kind {
            MediaKind::Images => self.run_images(&round, &request).await,
            MediaKind::Videos => Ok(self.run_videos(&round, &request).await),
        };

        round.close().await;
        result
    }

    async fn run_images(&self, round: &Round, request: &AnalyzeRequest) -> Result<AnalyzeResults, PipelineError> {
        let descriptors = self.preprocessor.images(round, &request.jobs).await?;
        let (job_ids, paths): (Vec<String>, Vec<_>) = descriptors
            .into_iter()
            .map(|d| (d.job_id, d.image_path))
            .unzip();

        let results = scan_frames(
            self.classifier.clone(),
            MediaKind::Images,
            paths,
            round.base_dir(),
            self.config.pre_scan_retry,
        )
        .await?;

        Ok(AnalyzeResults::Images(image_verdicts(&job_ids, results)))
    }

    async fn run_videos(&self, round: &Round, request: &AnalyzeRequest) -> AnalyzeResults {
        let descriptors = self.preprocessor.videos(round, &request.jobs).await;
        AnalyzeResults::Videos {
            results: self.scan_videos(round.base_dir(), descriptors).await,
        }
    }

    /// Each video is scanned on its own so one job's failure never hides its siblings.
    async fn scan_videos(&self, base_dir: &Path, descriptors: Vec<VideoDescriptor>) -> Vec<VideoVerdict> {
        let mut verdicts: Vec<VideoVerdict> = Vec::with_capacity(descriptors.len());
        for mut descriptor in descriptors {
            let results = if descriptor.error.is_some() {
                Vec::new()
            } else {
                match scan_frames(
                    self.classifier.clone(),
                    MediaKind::Videos,
                    descriptor.frame_paths.clone(),
                    base_dir,
                    self.config.pre_scan_retry,
                )
                .await
                {
                    Ok(results) => results,
                    Err(e) => {
                        log::error!("[scan] Video {} failed: {}", descriptor.job_id, e);
                        descriptor.error = Some(e.to_string());
                        Vec::new()
                    }
                }
            };

            match aggregate_video(&descriptor, &results) {
                Some(verdict) => verdicts.push(verdict),
                None => log::info!("[engine] Video {} produced no frames, omitted", descriptor.job_id),
            }
        }
        verdicts
    }
}

/// Construct the classifier named by the configuration
pub fn build_classifier(config: &ScanConfig) -> anyhow::Result<Arc<dyn Classifier>> {
    Ok(match config.classifier {
        ClassifierKind::Nsfw => Arc::new(NsfwClassifier::new(config.nsfw_threshold, config.batch_size)?),
        ClassifierKind::NoOp => {
            log::warn!("[engine] Using no-op classifier, every item will be reported safe");
            Arc::new(NoOpClassifier::new())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VideoMetadata;
    use crate::preprocess::tests::StubDownloader;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::path::PathBuf;

    struct PanickingDownloader;

    impl Downloader for PanickingDownloader {
        fn download<'a>(
            &'a self,
            url: &'a str,
            _dest_dir: &'a Path,
            _filename: Option<&'a str>,
            _max_bytes: u64,
        ) -> BoxFuture<'a, Option<PathBuf>> {
            Box::pin(async move { panic!("download of {url} blew up") })
        }
    }

    fn video_descriptor(job_id: &str, frame_paths: Vec<PathBuf>, error: Option<&str>) -> VideoDescriptor {
        VideoDescriptor {
            job_id: job_id.to_string(),
            frame_paths,
            metadata: VideoMetadata {
                width: 640,
                height: 360,
                duration: 4.0,
                fps: 25.0,
                size_mb: 0.5,
                original_filename: "video.mp4".to_string(),
            },
            error: error.map(str::to_string),
        }
    }

    fn engine(base: &std::path::Path, downloader: StubDownloader) -> ScanEngine {
        let config = ScanConfig {
            base_dir: base.to_path_buf(),
            ..ScanConfig::default()
        };
        ScanEngine::new(config, Arc::new(NoOpClassifier::new()), Arc::new(downloader))
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        image::RgbImage::new(8, 6)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn base_is_empty(base: &std::path::Path) -> bool {
        std::fs::read_dir(base).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_failed_image_download_is_omitted() {
        let base = tempfile::tempdir().unwrap();
        let engine = engine(
            base.path(),
            StubDownloader::default().with("https://cdn.test/ok.png", &png_bytes()),
        );

        let response = engine
            .handle(json!({
                "type": "images",
                "jobs": [
                    {"job_id": "ok", "url": "https://cdn.test/ok.png"},
                    {"job_id": "missing", "url": "https://cdn.test/404.png"}
                ]
            }))
            .await;

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "success");
        let results = value["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["job_id"], "ok");
        assert_eq!(results[0]["filename"], "ok.png");
        assert_eq!(results[0]["width"], 8);
        assert_eq!(results[0]["frame_count"], 1);
        assert_eq!(results[0]["engine_version"], "scan-engine-v1");
        assert!(base_is_empty(base.path()), "round directory must be removed");
    }

    #[tokio::test]
    async fn test_validation_error_envelope() {
        let base = tempfile::tempdir().unwrap();
        let engine = engine(base.path(), StubDownloader::default());

        let response = engine.handle(json!({"type": "audio", "jobs": []})).await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"status": "error", "message": "Invalid type: must be 'videos' or 'images'"})
        );
        assert!(base_is_empty(base.path()));
    }

    #[tokio::test]
    async fn test_skipped_videos_yield_empty_wrapped_results() {
        let base = tempfile::tempdir().unwrap();
        let engine = engine(
            base.path(),
            StubDownloader::default().with("https://cdn.test/a.mp4", b"garbage"),
        );

        let response = engine
            .handle(json!({
                "type": "videos",
                "jobs": [
                    {"job_id": "a", "url": "https://cdn.test/a.mp4"},
                    {"job_id": "b", "url": "https://cdn.test/b.mp4"}
                ]
            }))
            .await;

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"status": "success", "results": {"results": []}})
        );
        assert!(base_is_empty(base.path()));
    }

    #[tokio::test]
    async fn test_results_never_exceed_jobs() {
        let base = tempfile::tempdir().unwrap();
        let mut downloader = StubDownloader::default();
        let jobs: Vec<Value> = (0..5)
            .map(|i| {
                let url = format!("https://cdn.test/{i}.png");
                if i % 2 == 0 {
                    downloader = std::mem::take(&mut downloader).with(&url, &png_bytes());
                }
                json!({"job_id": format!("job-{i}"), "url": url})
            })
            .collect();
        let engine = engine(base.path(), downloader);

        let results = engine
            .analyze(&json!({"type": "images", "jobs": jobs}))
            .await
            .unwrap();
        let AnalyzeResults::Images(verdicts) = results else {
            panic!("expected image results");
        };
        let ids: Vec<&str> = verdicts.iter().map(|v| v.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job-0", "job-2", "job-4"]);
    }

    #[tokio::test]
    async fn test_failed_video_reported_beside_scanned_sibling() {
        let base = tempfile::tempdir().unwrap();
        let engine = engine(base.path(), StubDownloader::default());

        let final_dir = base.path().join("round").join("videos").join("ok").join("final");
        std::fs::create_dir_all(&final_dir).unwrap();
        let frames: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = final_dir.join(format!("{i}.jpg"));
                std::fs::write(&path, png_bytes()).unwrap();
                path
            })
            .collect();

        let descriptors = vec![
            video_descriptor("broken", vec![], Some("ffmpeg (scene) failed: exit status 1")),
            video_descriptor("ok", frames, None),
        ];
        let verdicts = engine.scan_videos(base.path(), descriptors).await;

        let ids: Vec<&str> = verdicts.iter().map(|v| v.job_id.as_str()).collect();
        assert_eq!(ids, vec!["broken", "ok"]);
        assert_eq!(verdicts[0].frame_count, 0);
        assert_eq!(
            verdicts[0].error.as_deref(),
            Some("ffmpeg (scene) failed: exit status 1")
        );
        assert_eq!(verdicts[1].frame_count, 3);
        assert_eq!(verdicts[1].error, None);
        assert!(!verdicts[1].is_nsfw);
    }

    #[tokio::test]
    async fn test_panic_in_pipeline_still_yields_envelope() {
        let base = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            base_dir: base.path().to_path_buf(),
            ..ScanConfig::default()
        };
        let engine = Arc::new(ScanEngine::new(
            config,
            Arc::new(NoOpClassifier::new()),
            Arc::new(PanickingDownloader),
        ));

        let response = engine
            .handle_isolated(json!({
                "type": "images",
                "jobs": [{"job_id": "a", "url": "https://cdn.test/a.png"}]
            }))
            .await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"status": "error", "message": "Internal error"})
        );
    }
}
