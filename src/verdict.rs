//! Folding frame results into job-level verdicts

use crate::constants::ENGINE_VERSION;
use crate::models::{FrameResult, ImageVerdict, ProbabilityMap, VideoDescriptor, VideoVerdict, round_to};

/// Images: one verdict per result, paired with its job id.
pub fn image_verdicts(job_ids: &[String], results: Vec<FrameResult>) -> Vec<ImageVerdict> {
    job_ids
        .iter()
        .zip(results)
        .map(|(job_id, frame)| ImageVerdict {
            job_id: job_id.clone(),
            frame,
            frame_count: 1,
            engine_version: ENGINE_VERSION.to_string(),
        })
        .collect()
}

/// Videos: any/max/avg across frames.
///
/// Returns `None` for a job that produced no frames and reported no error.
/// Ties for the maximum score keep the earliest frame.
pub fn aggregate_video(descriptor: &VideoDescriptor, results: &[FrameResult]) -> Option<VideoVerdict> {
    if results.is_empty() && descriptor.error.is_none() {
        return None;
    }

    let top = results
        .iter()
        .reduce(|best, r| if r.nsfw_score > best.nsfw_score { r } else { best });
    let (nsfw_score_max, full_probs) = match top {
        Some(top) => (top.nsfw_score, top.full_probs.clone()),
        None => (0.0, ProbabilityMap::new()),
    };
    let nsfw_score_avg = if results.is_empty() {
        0.0
    } else {
        let total: f64 = results.iter().map(|r| r.nsfw_score).sum();
        round_to(total / results.len() as f64, 4)
    };

    let metadata = &descriptor.metadata;
    let filename = if metadata.original_filename.is_empty() {
        descriptor.job_id.clone()
    } else {
        metadata.original_filename.clone()
    };

    Some(VideoVerdict {
        job_id: descriptor.job_id.clone(),
        filename,
        is_nsfw: results.iter().any(|r| r.is_nsfw),
        nsfw_score_max,
        nsfw_score_avg,
        full_probs,
        frame_count: results.len(),
        engine_version: ENGINE_VERSION.to_string(),
        width: metadata.width,
        height: metadata.height,
        duration: metadata.duration,
        fps: metadata.fps,
        size_mb: metadata.size_mb,
        error: descriptor.error.clone().or_else(|| shared_frame_error(results)),
    })
}

/// The first frame error, when every frame failed
fn shared_frame_error(results: &[FrameResult]) -> Option<String> {
    if results.is_empty() || results.iter().any(|r| r.error.is_none()) {
        return None;
    }
    results.first().and_then(|r| r.error.clone())
}
