//! Error taxonomy for the scan pipeline

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Malformed request. The message is surfaced to the caller verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffmpeg ({label}) failed: {stderr}")]
    Ffmpeg { label: String, stderr: String },

    #[error("probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("{} final frame(s) missing: {}", .missing.len(), preview(.missing))]
    FramesMissing { missing: Vec<PathBuf> },

    #[error("timed out after {waited:?} waiting for {path}")]
    ReadinessTimeout { path: PathBuf, waited: Duration },

    #[error("invalid readiness marker {path}: {source}")]
    MarkerParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn preview(paths: &[PathBuf]) -> String {
    let shown: Vec<String> = paths.iter().take(3).map(|p| p.display().to_string()).collect();
    if paths.len() > 3 {
        format!("{} ...", shown.join(", "))
    } else {
        shown.join(", ")
    }
}
