//! Runtime configuration
//!
//! Every knob has a default and can be overridden through the environment.
//! Invalid or non-positive values fall back to the default.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    MAX_IMAGE_BYTES, MAX_VIDEO_BYTES, MAX_VIDEO_DURATION_SECS, NSFW_THRESHOLD,
};

const DEFAULT_BASE_DIR: &str = "/tmp/data";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_VIDEO_CONCURRENCY: usize = 2;
const DEFAULT_UNIFORM_FPS: f64 = 0.6667;
const DEFAULT_FRAME_WIDTH: u32 = 320;
const DEFAULT_SCENE_THRESHOLD: f64 = 0.4;
const DEFAULT_SCENE_STRIDE: u32 = 5;
const DEFAULT_MAX_FPS_FRAMES: usize = 60;
const DEFAULT_MAX_SPIKE_FRAMES: usize = 30;
const DEFAULT_SPIKE_WORKERS: usize = 4;
const DEFAULT_SPIKE_DIFF_THRESHOLD: f64 = 15.0;
const DEFAULT_SPIKE_INTERVAL_SECS: f64 = 0.1;
const DEFAULT_SPIKE_SUPPRESSION_SECS: f64 = 1.0;
const DEFAULT_FFMPEG_THREADS: usize = 2;
const DEFAULT_READY_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BATCH_SIZE: usize = 32;

/// A bounded retry budget: `attempts` checks spaced `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Flush check after dedup: up to ~2.5s
    pub const fn flush() -> Self {
        Self::new(10, Duration::from_millis(250))
    }

    /// Existence check right before classification: 5 x 0.5s
    pub const fn pre_scan() -> Self {
        Self::new(5, Duration::from_millis(500))
    }
}

/// Polling budget for the readiness marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Luma spike detection parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeConfig {
    /// Mean absolute luma difference (0-255) that counts as a spike
    pub diff_threshold: f64,
    /// Seconds between sampled frames
    pub sample_interval: f64,
    /// Minimum seconds between two recorded spikes
    pub suppression_window: f64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            diff_threshold: DEFAULT_SPIKE_DIFF_THRESHOLD,
            sample_interval: DEFAULT_SPIKE_INTERVAL_SECS,
            suppression_window: DEFAULT_SPIKE_SUPPRESSION_SECS,
        }
    }
}

/// Frame extraction parameters for one video
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    pub uniform_fps: f64,
    pub frame_width: u32,
    pub scene_threshold: f64,
    pub scene_stride: u32,
    pub max_fps_frames: usize,
    pub max_spike_frames: usize,
    pub spike_workers: usize,
    pub ffmpeg_threads: usize,
    pub spike: SpikeConfig,
    pub flush_retry: RetryPolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            uniform_fps: DEFAULT_UNIFORM_FPS,
            frame_width: DEFAULT_FRAME_WIDTH,
            scene_threshold: DEFAULT_SCENE_THRESHOLD,
            scene_stride: DEFAULT_SCENE_STRIDE,
            max_fps_frames: DEFAULT_MAX_FPS_FRAMES,
            max_spike_frames: DEFAULT_MAX_SPIKE_FRAMES,
            spike_workers: DEFAULT_SPIKE_WORKERS,
            ffmpeg_threads: DEFAULT_FFMPEG_THREADS,
            spike: SpikeConfig::default(),
            flush_retry: RetryPolicy::flush(),
        }
    }
}

/// Which classifier backs the scan stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    Nsfw,
    NoOp,
}

/// Top-level configuration shared by every stage
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub base_dir: PathBuf,
    pub max_image_bytes: u64,
    pub max_video_bytes: u64,
    pub max_video_duration_secs: f64,
    pub download_timeout: Duration,
    pub video_concurrency: usize,
    pub extraction: ExtractionConfig,
    pub ready_wait: WaitPolicy,
    pub pre_scan_retry: RetryPolicy,
    pub nsfw_threshold: f64,
    pub batch_size: usize,
    pub classifier: ClassifierKind,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            max_image_bytes: MAX_IMAGE_BYTES,
            max_video_bytes: MAX_VIDEO_BYTES,
            max_video_duration_secs: MAX_VIDEO_DURATION_SECS,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            video_concurrency: DEFAULT_VIDEO_CONCURRENCY,
            extraction: ExtractionConfig::default(),
            ready_wait: WaitPolicy::default(),
            pre_scan_retry: RetryPolicy::pre_scan(),
            nsfw_threshold: NSFW_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            classifier: ClassifierKind::Nsfw,
        }
    }
}

impl ScanConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let extraction = ExtractionConfig {
            uniform_fps: positive_env("SCAN_UNIFORM_FPS", defaults.extraction.uniform_fps),
            frame_width: positive_env("SCAN_FRAME_WIDTH", defaults.extraction.frame_width),
            scene_threshold: positive_env(
                "SCAN_SCENE_THRESHOLD",
                defaults.extraction.scene_threshold,
            ),
            scene_stride: defaults.extraction.scene_stride,
            max_fps_frames: positive_env("SCAN_MAX_FPS_FRAMES", defaults.extraction.max_fps_frames),
            max_spike_frames: positive_env(
                "SCAN_MAX_SPIKE_FRAMES",
                defaults.extraction.max_spike_frames,
            ),
            spike_workers: positive_env("SCAN_SPIKE_WORKERS", defaults.extraction.spike_workers),
            ffmpeg_threads: positive_env("FFMPEG_THREADS", defaults.extraction.ffmpeg_threads),
            spike: SpikeConfig {
                diff_threshold: positive_env(
                    "SCAN_SPIKE_DIFF_THRESHOLD",
                    defaults.extraction.spike.diff_threshold,
                ),
                sample_interval: positive_env(
                    "SCAN_SPIKE_INTERVAL_SECS",
                    defaults.extraction.spike.sample_interval,
                ),
                suppression_window: positive_env(
                    "SCAN_SPIKE_SUPPRESSION_SECS",
                    defaults.extraction.spike.suppression_window,
                ),
            },
            flush_retry: defaults.extraction.flush_retry,
        };

        let classifier = match env::var("SCAN_CLASSIFIER").ok().as_deref() {
            Some("noop") => ClassifierKind::NoOp,
            _ => ClassifierKind::Nsfw,
        };

        Self {
            base_dir: env::var("SCAN_BASE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            max_image_bytes: positive_env("SCAN_MAX_IMAGE_BYTES", defaults.max_image_bytes),
            max_video_bytes: positive_env("SCAN_MAX_VIDEO_BYTES", defaults.max_video_bytes),
            max_video_duration_secs: positive_env(
                "SCAN_MAX_VIDEO_DURATION_SECS",
                defaults.max_video_duration_secs,
            ),
            download_timeout: Duration::from_secs(positive_env(
                "SCAN_DOWNLOAD_TIMEOUT_SECS",
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            )),
            video_concurrency: positive_env("SCAN_VIDEO_CONCURRENCY", defaults.video_concurrency),
            extraction,
            ready_wait: WaitPolicy {
                timeout: Duration::from_secs(positive_env(
                    "SCAN_READY_TIMEOUT_SECS",
                    DEFAULT_READY_TIMEOUT_SECS,
                )),
                ..defaults.ready_wait
            },
            pre_scan_retry: defaults.pre_scan_retry,
            nsfw_threshold: positive_env("SCAN_NSFW_THRESHOLD", defaults.nsfw_threshold),
            batch_size: positive_env("SCAN_BATCH_SIZE", defaults.batch_size),
            classifier,
        }
    }
}

fn positive_env<T>(key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}
