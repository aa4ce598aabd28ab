//! Candidate frame samplers. Each writes into its own staging directory.

use futures::stream::{self, StreamExt};
use std::ffi::OsString;
use std::path::Path;

use super::ffmpeg::{VideoProbe, jpeg_output_args, run_ffmpeg};
use super::spike::detect_luma_spikes;
use crate::config::ExtractionConfig;
use crate::error::PipelineError;

/// Which sampler produced a staging directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Scene,
    Uniform,
    Spike,
}

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Scene => "scene",
            Strategy::Uniform => "fps",
            Strategy::Spike => "spike",
        }
    }
}

/// Scene-change frames, thinned to every `stride`-th decoded frame
pub fn scene_filter(threshold: f64, stride: u32) -> String {
    format!("select='gt(scene,{})*not(mod(n\\,{}))'", threshold, stride)
}

/// Fixed-rate frames scaled to `width` (aspect preserved, even height)
pub fn uniform_filter(fps: f64, width: u32) -> String {
    format!("fps={},{}", fps, scale_filter(width))
}

pub fn scale_filter(width: u32) -> String {
    format!("scale={}:-2", width)
}

fn input_args(video: &Path, filter: &str) -> Vec<OsString> {
    vec![
        "-i".into(),
        video.into(),
        "-vf".into(),
        filter.into(),
        "-vsync".into(),
        "vfr".into(),
    ]
}

pub async fn run_scene_sampler(
    video: &Path,
    out_dir: &Path,
    config: &ExtractionConfig,
) -> Result<(), PipelineError> {
    let mut args = input_args(
        video,
        &scene_filter(config.scene_threshold, config.scene_stride),
    );
    args.extend(jpeg_output_args(
        config.ffmpeg_threads,
        out_dir.join("frame_%03d.jpg"),
    ));
    run_ffmpeg(Strategy::Scene.label(), args).await
}

pub async fn run_uniform_sampler(
    video: &Path,
    out_dir: &Path,
    config: &ExtractionConfig,
) -> Result<(), PipelineError> {
    let mut args = input_args(
        video,
        &uniform_filter(config.uniform_fps, config.frame_width),
    );
    args.extend(jpeg_output_args(
        config.ffmpeg_threads,
        out_dir.join("frame_%03d.jpg"),
    ));
    run_ffmpeg(Strategy::Uniform.label(), args).await
}

/// Extract one frame per detected spike. Individual extraction failures are
/// logged and skipped; returns the number of frames written.
pub async fn run_spike_sampler(
    video: &Path,
    out_dir: &Path,
    probe: &VideoProbe,
    config: &ExtractionConfig,
) -> Result<usize, PipelineError> {
    let mut spikes = match detect_luma_spikes(video, probe, config.spike).await {
        Ok(spikes) => spikes,
        Err(e) => {
            log::warn!("[frames] Spike detection failed for {}: {}", video.display(), e);
            Vec::new()
        }
    };
    log::info!("[frames] Found {} spikes", spikes.len());
    spikes.truncate(config.max_spike_frames);

    let scale = scale_filter(config.frame_width);
    let extracted = stream::iter(spikes.into_iter().enumerate())
        .map(|(i, ts)| {
            let scale = scale.as_str();
            async move {
                let mut args: Vec<OsString> = vec![
                    "-ss".into(),
                    format!("{:.2}", ts).into(),
                    "-i".into(),
                    video.into(),
                    "-frames:v".into(),
                    "1".into(),
                    "-update".into(),
                    "1".into(),
                    "-vf".into(),
                    scale.into(),
                ];
                args.extend(jpeg_output_args(1, out_dir.join(format!("frame_{:03}.jpg", i))));
                match run_ffmpeg(Strategy::Spike.label(), args).await {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("[frames] Error extracting spike frame at {:.2}s: {}", ts, e);
                        false
                    }
                }
            }
        })
        .buffer_unordered(config.spike_workers.max(1))
        .collect::<Vec<bool>>()
        .await;

    Ok(extracted.into_iter().filter(|ok| *ok).count())
}
