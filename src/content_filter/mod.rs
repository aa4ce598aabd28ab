use anyhow::Result;
use std::path::PathBuf;

use crate::models::ProbabilityMap;

/// Classification of one image file
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub path: PathBuf,
    pub is_nsfw: bool,
    pub score: f64,
    pub probs: ProbabilityMap,
}

/// Pluggable image classifier used by the scan stage.
///
/// Implementations must return exactly one classification per input path, in
/// input order. Calls are blocking and run off the async runtime.
pub trait Classifier: Send + Sync {
    fn classify(&self, paths: &[PathBuf]) -> Result<Vec<Classification>>;
}

mod noop;
mod nsfw;

pub use noop::NoOpClassifier;
pub use nsfw::NsfwClassifier;
