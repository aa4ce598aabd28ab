//! Shared data models used across modules

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Label -> probability map reported by the classifier
pub type ProbabilityMap = BTreeMap<String, f64>;

/// Kind of media carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Images,
    Videos,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Images => "images",
            MediaKind::Videos => "videos",
        }
    }
}

/// One unit of work: a caller-chosen id plus the media URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub url: String,
}

/// A validated analysis request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub jobs: Vec<Job>,
}

/// Preprocessed image job
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub job_id: String,
    pub image_path: PathBuf,
}

/// Container-level facts about an accepted video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub fps: f64,
    pub size_mb: f64,
    pub original_filename: String,
}

/// Preprocessed video job.
///
/// Empty `frame_paths` with no `error` is the valid "no usable frames" state.
/// A set `error` means extraction or the readiness wait failed for this job.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDescriptor {
    pub job_id: String,
    pub frame_paths: Vec<PathBuf>,
    pub metadata: VideoMetadata,
    pub error: Option<String>,
}

/// Classification of a single frame or image, reshaped for the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub filename: String,
    pub relative_path: String,
    pub is_nsfw: bool,
    pub nsfw_score: f64,
    pub full_probs: ProbabilityMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<f64>,
    pub error: Option<String>,
}

/// Job-level result for an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageVerdict {
    pub job_id: String,
    #[serde(flatten)]
    pub frame: FrameResult,
    pub frame_count: usize,
    pub engine_version: String,
}

/// Job-level result for a video, folded from its frame results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoVerdict {
    pub job_id: String,
    pub filename: String,
    pub is_nsfw: bool,
    pub nsfw_score_max: f64,
    pub nsfw_score_avg: f64,
    pub full_probs: ProbabilityMap,
    pub frame_count: usize,
    pub engine_version: String,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub fps: f64,
    pub size_mb: f64,
    pub error: Option<String>,
}

/// Successful payload; videos are wrapped one level deeper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalyzeResults {
    Videos { results: Vec<VideoVerdict> },
    Images(Vec<ImageVerdict>),
}

/// Response envelope returned by every entrypoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AnalyzeResponse {
    Success { results: AnalyzeResults },
    Error { message: String },
}

/// Round to `places` decimals
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
