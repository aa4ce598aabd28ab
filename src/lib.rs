//! Remote media to NSFW verdicts.
//!
//! Images are downloaded and classified directly. Videos are reduced to a
//! small deduplicated frame set by three concurrent samplers, published
//! behind a readiness marker, classified, and folded into one verdict per job.

pub mod config;
pub mod constants;
pub mod content_filter;
pub mod engine;
pub mod error;
pub mod frames;
pub mod logging;
pub mod models;
pub mod preprocess;
pub mod round;
pub mod scan;
pub mod storage;
pub mod validate;
pub mod verdict;

pub use config::ScanConfig;
pub use engine::ScanEngine;
pub use error::{PipelineError, ValidationError};
pub use models::{AnalyzeRequest, AnalyzeResponse, AnalyzeResults};
