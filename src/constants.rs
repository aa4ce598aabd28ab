//! Application constants

/// Tag attached to every verdict so consumers can tell engine revisions apart
pub const ENGINE_VERSION: &str = "scan-engine-v1";

/// Image extensions accepted after download (lowercase, with dot)
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".bmp", ".webp"];

/// Video extensions accepted after download (lowercase, with dot)
pub const ALLOWED_VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".avi", ".mkv", ".webm"];

/// Extension given to downloads whose URL carries no recognised media extension
pub const UNKNOWN_EXTENSION: &str = ".bin";

/// Maximum image download size (10 MB)
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum video download size (100 MB)
pub const MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;

/// Videos longer than this are rejected before extraction (5 minutes)
pub const MAX_VIDEO_DURATION_SECS: f64 = 5.0 * 60.0;

/// Job limits per request
pub const MAX_JOBS: usize = 40;
pub const MAX_VIDEO_JOBS: usize = 10;
pub const MAX_IMAGE_JOBS: usize = 40;

/// Per-round directory names
pub const IMAGES_DIR: &str = "images";
pub const VIDEOS_DIR: &str = "videos";

/// Per-video staging directories, in dedup priority order
pub const SCENE_DIR: &str = "scene";
pub const FPS_DIR: &str = "fps";
pub const SPIKE_DIR: &str = "spike";
pub const FINAL_DIR: &str = "final";

/// Readiness marker written next to the staging directories
pub const DONE_MARKER: &str = "done.json";

/// File stem used for downloaded videos
pub const VIDEO_FILE_STEM: &str = "video";

/// Score above which a frame counts as NSFW
pub const NSFW_THRESHOLD: f64 = 0.5;

/// Label whose probability is reported as the NSFW score
pub const NSFW_LABEL: &str = "nsfw";

/// Returns true if `ext` (with dot, any case) is an allowed image extension
pub fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// Returns true if `ext` (with dot, any case) is an allowed video extension
pub fn is_video_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    ALLOWED_VIDEO_EXTENSIONS.contains(&ext.as_str())
}
