use anyhow::Result;
use std::path::PathBuf;

use super::{Classification, Classifier};
use crate::constants::NSFW_LABEL;
use crate::models::ProbabilityMap;

/// Classifier that always reports safe - for testing or opt-out
pub struct NoOpClassifier;

impl NoOpClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoOpClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for NoOpClassifier {
    fn classify(&self, paths: &[PathBuf]) -> Result<Vec<Classification>> {
        Ok(paths
            .iter()
            .map(|path| Classification {
                path: path.clone(),
                is_nsfw: false,
                score: 0.0,
                probs: ProbabilityMap::from([(NSFW_LABEL.to_string(), 0.0)]),
            })
            .collect())
    }
}
