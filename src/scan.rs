//! Scan dispatch: hand frame/image paths to the classifier and shape results.
//!
//! Missing inputs after the retry budget are fatal. Classifier failures are
//! not: every path then gets an error-tagged, safe-scored result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RetryPolicy;
use crate::content_filter::{Classification, Classifier};
use crate::error::PipelineError;
use crate::frames::barrier::await_paths;
use crate::models::{FrameResult, MediaKind, ProbabilityMap};
use crate::preprocess::bytes_to_mb;

/// Classify `paths` and return one `FrameResult` per path, in input order.
pub async fn scan_frames(
    classifier: Arc<dyn Classifier>,
    kind: MediaKind,
    paths: Vec<PathBuf>,
    base_dir: &Path,
    retry: RetryPolicy,
) -> Result<Vec<FrameResult>, PipelineError> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }

    await_paths(&paths, retry).await.map_err(|missing| {
        log::error!("[scan] {} {} missing before scan", missing.len(), kind.as_str());
        PipelineError::FramesMissing { missing }
    })?;

    log::info!("[scan] Classifying {} {}", paths.len(), kind.as_str());
    let root = base_dir.to_path_buf();
    let inputs = paths.clone();
    let shaped = tokio::task::spawn_blocking(move || -> Result<Vec<FrameResult>, String> {
        let classified = classifier.classify(&inputs).map_err(|e| e.to_string())?;
        if classified.len() != inputs.len() {
            return Err(format!(
                "classifier returned {} results for {} inputs",
                classified.len(),
                inputs.len()
            ));
        }
        Ok(classified
            .into_iter()
            .map(|c| shape_result(c, kind, &root))
            .collect())
    })
    .await;

    let error = match shaped {
        Ok(Ok(results)) => return Ok(results),
        Ok(Err(message)) => message,
        Err(join) => join.to_string(),
    };
    log::error!("[scan] Classification failed, degrading {} results: {}", paths.len(), error);
    Ok(degraded_results(&paths, kind, base_dir, &error))
}

fn shape_result(classification: Classification, kind: MediaKind, base_dir: &Path) -> FrameResult {
    let mut result = FrameResult {
        filename: file_name(&classification.path),
        relative_path: relative_path(&classification.path, base_dir),
        is_nsfw: classification.is_nsfw,
        nsfw_score: classification.score,
        full_probs: classification.probs,
        width: None,
        height: None,
        size_mb: None,
        error: None,
    };

    if kind == MediaKind::Images {
        match image::image_dimensions(&classification.path) {
            Ok((width, height)) => {
                result.width = Some(width);
                result.height = Some(height);
            }
            Err(e) => log::warn!(
                "[scan] Could not read dimensions of {}: {}",
                classification.path.display(),
                e
            ),
        }
        result.size_mb = std::fs::metadata(&classification.path)
            .ok()
            .map(|m| bytes_to_mb(m.len()));
    }
    result
}

/// One safe, error-tagged result per path
pub fn degraded_results(paths: &[PathBuf], kind: MediaKind, base_dir: &Path, error: &str) -> Vec<FrameResult> {
    paths
        .iter()
        .map(|path| FrameResult {
            filename: file_name(path),
            relative_path: relative_path(path, base_dir),
            is_nsfw: false,
            nsfw_score: 0.0,
            full_probs: ProbabilityMap::new(),
            width: None,
            height: None,
            size_mb: (kind == MediaKind::Images)
                .then(|| std::fs::metadata(path).ok().map(|m| bytes_to_mb(m.len())))
                .flatten(),
            error: Some(error.to_string()),
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn relative_path(path: &Path, base_dir: &Path) -> String {
    path.strip_prefix(base_dir)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
