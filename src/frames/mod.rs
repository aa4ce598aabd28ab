//! Video frame extraction
//!
//! Three samplers run concurrently against the same source, each into its own
//! staging directory. Once all of them finish, staged frames are deduplicated
//! by content hash into `final/`, confirmed on disk, and `done.json` is written.

pub mod barrier;
pub mod dedup;
pub mod ffmpeg;
pub mod spike;
pub mod strategies;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ExtractionConfig;
use crate::constants::{FINAL_DIR, FPS_DIR, SCENE_DIR, SPIKE_DIR};
use crate::error::PipelineError;
use crate::models::round_to;

use barrier::{ReadinessMarker, confirm_frames_on_disk, write_marker};
use dedup::FrameDeduplicator;
use ffmpeg::VideoProbe;
use strategies::Strategy;

/// Staging layout under one video's output directory
#[derive(Debug, Clone)]
pub struct StagingDirs {
    pub scene: PathBuf,
    pub fps: PathBuf,
    pub spike: PathBuf,
    pub final_dir: PathBuf,
}

impl StagingDirs {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            scene: output_dir.join(SCENE_DIR),
            fps: output_dir.join(FPS_DIR),
            spike: output_dir.join(SPIKE_DIR),
            final_dir: output_dir.join(FINAL_DIR),
        }
    }

    async fn create(&self) -> std::io::Result<()> {
        for dir in [&self.scene, &self.fps, &self.spike, &self.final_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// Extract, deduplicate and publish the frames of `video` under `output_dir`.
///
/// Returns final frame paths in claim order. A scene or uniform sampler failure
/// aborts the remaining samplers and is returned; spike failures are tolerated.
pub async fn extract_video_frames(
    video: &Path,
    output_dir: &Path,
    probe: &VideoProbe,
    config: &ExtractionConfig,
) -> Result<Vec<PathBuf>, PipelineError> {
    let started = Instant::now();
    let dirs = StagingDirs::new(output_dir);
    dirs.create().await?;

    run_samplers(video, &dirs, probe, config).await?;

    let max_fps_frames = config.max_fps_frames;
    let staged = dirs.clone();
    let frames = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<PathBuf>> {
        let mut dedup = FrameDeduplicator::new(&staged.final_dir);
        dedup.claim_dir(&staged.scene, None)?;
        dedup.claim_dir(&staged.fps, Some(max_fps_frames))?;
        dedup.claim_dir(&staged.spike, None)?;
        Ok(dedup.finish())
    })
    .await??;

    confirm_frames_on_disk(&frames, config.flush_retry).await?;

    let marker = ReadinessMarker {
        total_frames: frames.len(),
        output_dir: output_dir.display().to_string(),
        final_dir: dirs.final_dir.display().to_string(),
        time_elapsed: round_to(started.elapsed().as_secs_f64(), 2),
        timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    };
    write_marker(output_dir, &marker).await?;

    Ok(frames)
}

/// Run the three samplers to completion, failing fast on scene/uniform errors.
async fn run_samplers(
    video: &Path,
    dirs: &StagingDirs,
    probe: &VideoProbe,
    config: &ExtractionConfig,
) -> Result<(), PipelineError> {
    let video: Arc<Path> = Arc::from(video);
    let config = Arc::new(config.clone());
    let probe = *probe;
    let mut tasks = tokio::task::JoinSet::new();

    {
        let (video, out, config) = (video.clone(), dirs.scene.clone(), config.clone());
        tasks.spawn(async move {
            let result = strategies::run_scene_sampler(&video, &out, &config).await;
            (Strategy::Scene, result.map(|()| 0))
        });
    }
    {
        let (video, out, config) = (video.clone(), dirs.fps.clone(), config.clone());
        tasks.spawn(async move {
            let result = strategies::run_uniform_sampler(&video, &out, &config).await;
            (Strategy::Uniform, result.map(|()| 0))
        });
    }
    {
        let (video, out, config) = (video.clone(), dirs.spike.clone(), config.clone());
        tasks.spawn(async move {
            let result = strategies::run_spike_sampler(&video, &out, &probe, &config).await;
            (Strategy::Spike, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((Strategy::Spike, Ok(written))) => {
                log::info!("[frames] Spike sampler wrote {} frames", written);
            }
            Ok((Strategy::Spike, Err(e))) => {
                log::warn!("[frames] Spike sampler failed: {}", e);
            }
            Ok((strategy, Ok(_))) => {
                log::debug!("[frames] {} sampler finished", strategy.label());
            }
            Ok((strategy, Err(e))) => {
                log::error!("[frames] {} sampler failed: {}", strategy.label(), e);
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                log::error!("[frames] Sampler task panicked: {}", e);
                tasks.abort_all();
                return Err(e.into());
            }
        }
    }
    Ok(())
}
