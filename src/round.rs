//! Per-request working directories.
//!
//! A round owns `{base}/{round_id}` and everything below it. The directory is
//! removed when the round is closed, or on drop if it never was.

use std::path::{Path, PathBuf};

use crate::constants::{IMAGES_DIR, VIDEOS_DIR};

#[derive(Debug)]
pub struct Round {
    id: String,
    root: PathBuf,
    base_dir: PathBuf,
    closed: bool,
}

impl Round {
    /// Allocate a fresh round id and create its directory.
    pub async fn open(base_dir: &Path) -> std::io::Result<Self> {
        let id = format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>());
        let root = base_dir.join(&id);
        tokio::fs::create_dir_all(&root).await?;
        log::info!("[round] Opened {} at {}", id, root.display());
        Ok(Self {
            id,
            root,
            base_dir: base_dir.to_path_buf(),
            closed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory results' `relative_path` is computed against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `{base}/{round}/images`
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    /// `{base}/{round}/videos/{job_id}`
    pub fn video_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(VIDEOS_DIR).join(job_id)
    }

    /// Remove the round directory. Failures are logged, never returned.
    pub async fn close(mut self) {
        self.closed = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => log::info!("[round] Removed {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[round] Failed to remove {}: {}", self.root.display(), e),
        }
    }
}

impl Drop for Round {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[round] Failed to remove {} on drop: {}", self.root.display(), e);
            }
        }
    }
}
