//! Structural validation of inbound requests

use serde_json::Value;
use std::collections::HashSet;

use crate::constants::{MAX_IMAGE_JOBS, MAX_JOBS, MAX_VIDEO_JOBS};
use crate::error::ValidationError;
use crate::models::{AnalyzeRequest, Job, MediaKind};

/// Validate a raw request and return its typed form.
pub fn validate(request: &Value) -> Result<AnalyzeRequest, ValidationError> {
    let object = request
        .as_object()
        .ok_or_else(|| ValidationError::new("Input must be an object with 'type' and 'jobs'"))?;

    let (Some(kind), Some(jobs)) = (object.get("type"), object.get("jobs")) else {
        return Err(ValidationError::new("Missing 'type' or 'jobs' keys"));
    };

    let kind = match kind.as_str() {
        Some("images") => MediaKind::Images,
        Some("videos") => MediaKind::Videos,
        _ => {
            return Err(ValidationError::new(
                "Invalid type: must be 'videos' or 'images'",
            ));
        }
    };

    let jobs = jobs
        .as_array()
        .filter(|jobs| (1..=MAX_JOBS).contains(&jobs.len()))
        .ok_or_else(|| {
            ValidationError::new(format!("'jobs' must be a list of 1 to {} jobs", MAX_JOBS))
        })?;

    match kind {
        MediaKind::Videos if jobs.len() > MAX_VIDEO_JOBS => {
            return Err(ValidationError::new(format!(
                "Too many video jobs: max {} allowed",
                MAX_VIDEO_JOBS
            )));
        }
        MediaKind::Images if jobs.len() > MAX_IMAGE_JOBS => {
            return Err(ValidationError::new(format!(
                "Too many image jobs: max {} allowed",
                MAX_IMAGE_JOBS
            )));
        }
        _ => {}
    }

    let mut typed = Vec::with_capacity(jobs.len());
    let mut seen = HashSet::new();
    for job in jobs {
        let (Some(job_id), Some(url)) = (
            job.get("job_id").and_then(Value::as_str),
            job.get("url").and_then(Value::as_str),
        ) else {
            return Err(ValidationError::new(
                "Each job must contain 'job_id' and 'url' keys",
            ));
        };

        // job ids become file and directory names under the round
        if !is_safe_component(job_id) {
            return Err(ValidationError::new(format!("Invalid job_id: {:?}", job_id)));
        }
        if !seen.insert(job_id) {
            return Err(ValidationError::new(format!("Duplicate job_id: {}", job_id)));
        }

        typed.push(Job {
            job_id: job_id.to_string(),
            url: url.to_string(),
        });
    }

    Ok(AnalyzeRequest { kind, jobs: typed })
}

/// A single path component: no separators, no NUL, not `.` or `..`
fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jobs(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({"job_id": format!("job-{i}"), "url": format!("https://x/{i}.jpg")}))
            .collect()
    }

    #[test]
    fn test_accepts_valid_request() {
        let request = validate(&json!({"type": "images", "jobs": jobs(40)})).unwrap();
        assert_eq!(request.kind, MediaKind::Images);
        assert_eq!(request.jobs.len(), 40);
        assert_eq!(request.jobs[3].job_id, "job-3");
    }

    #[test]
    fn test_rejects_structural_problems() {
        assert_eq!(
            validate(&json!([1, 2])).unwrap_err().to_string(),
            "Input must be an object with 'type' and 'jobs'"
        );
        assert_eq!(
            validate(&json!({"type": "images"})).unwrap_err().to_string(),
            "Missing 'type' or 'jobs' keys"
        );
        assert_eq!(
            validate(&json!({"type": "audio", "jobs": jobs(1)}))
                .unwrap_err()
                .to_string(),
            "Invalid type: must be 'videos' or 'images'"
        );
        assert!(validate(&json!({"type": "images", "jobs": []})).is_err());
        assert!(validate(&json!({"type": "images", "jobs": jobs(41)})).is_err());
    }

    #[test]
    fn test_video_job_cap() {
        assert!(validate(&json!({"type": "videos", "jobs": jobs(10)})).is_ok());
        assert_eq!(
            validate(&json!({"type": "videos", "jobs": jobs(11)}))
                .unwrap_err()
                .to_string(),
            "Too many video jobs: max 10 allowed"
        );
    }

    #[test]
    fn test_job_fields_and_ids() {
        let missing_url = json!({"type": "images", "jobs": [{"job_id": "a"}]});
        assert_eq!(
            validate(&missing_url).unwrap_err().to_string(),
            "Each job must contain 'job_id' and 'url' keys"
        );

        let traversal = json!({"type": "images", "jobs": [{"job_id": "../etc", "url": "u"}]});
        assert!(validate(&traversal).is_err());

        for bad in ["", ".", "..", "a/b", "a\\b", "nul\u{0}id"] {
            let request = json!({"type": "images", "jobs": [{"job_id": bad, "url": "u"}]});
            assert!(validate(&request).is_err(), "{bad:?} should be rejected");
        }

        let duplicate = json!({"type": "images", "jobs": [
            {"job_id": "a", "url": "u1"},
            {"job_id": "a", "url": "u2"}
        ]});
        assert_eq!(
            validate(&duplicate).unwrap_err().to_string(),
            "Duplicate job_id: a"
        );
    }

    #[test]
    fn test_job_ids_only_need_to_be_path_safe() {
        let request = validate(&json!({"type": "images", "jobs": [
            {"job_id": "order 42", "url": "https://x/a.jpg"},
            {"job_id": "user@example.com", "url": "https://x/b.jpg"},
            {"job_id": "job:7", "url": "https://x/c.jpg"},
            {"job_id": "vidéo-1", "url": "https://x/d.jpg"}
        ]}))
        .unwrap();
        assert_eq!(request.jobs.len(), 4);
        assert_eq!(request.jobs[0].job_id, "order 42");

        let traversal = json!({"type": "videos", "jobs": [{"job_id": "../x", "url": "u"}]});
        assert_eq!(
            validate(&traversal).unwrap_err().to_string(),
            "Invalid job_id: \"../x\""
        );
    }
}
