//! Content-hash deduplication of staged frames.
//!
//! Staging directories are claimed in a fixed priority order and each one is
//! visited in sorted filename order, so the claim order depends only on the
//! staged contents. The first file to produce a hash is moved into the final
//! directory as `{hash}.jpg`; later files with the same hash are deleted.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub struct FrameDeduplicator {
    final_dir: PathBuf,
    seen: HashSet<String>,
    claimed: Vec<PathBuf>,
}

/// Outcome of claiming one staging directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimStats {
    pub visited: usize,
    pub added: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl FrameDeduplicator {
    pub fn new(final_dir: impl Into<PathBuf>) -> Self {
        Self {
            final_dir: final_dir.into(),
            seen: HashSet::new(),
            claimed: Vec::new(),
        }
    }

    /// Claim frames from `dir`, visiting at most `cap` files when set.
    ///
    /// Files that fail to hash or move are logged and do not count towards the cap.
    pub fn claim_dir(&mut self, dir: &Path, cap: Option<usize>) -> io::Result<ClaimStats> {
        let mut stats = ClaimStats::default();

        for path in sorted_files(dir)? {
            if cap.is_some_and(|cap| stats.visited >= cap) {
                break;
            }
            match self.claim_file(&path) {
                Ok(true) => stats.added += 1,
                Ok(false) => stats.duplicates += 1,
                Err(e) => {
                    log::warn!("[frames] Frame error {}: {}", path.display(), e);
                    stats.errors += 1;
                    continue;
                }
            }
            stats.visited += 1;
        }

        log::info!(
            "[frames] {} unique frames added from {} ({} duplicates, cap={:?})",
            stats.added,
            dir.display(),
            stats.duplicates,
            cap
        );
        Ok(stats)
    }

    /// Returns true if the file was new and moved into the final directory.
    fn claim_file(&mut self, path: &Path) -> io::Result<bool> {
        let hash = file_sha256(path)?;
        if self.seen.contains(&hash) {
            fs::remove_file(path)?;
            return Ok(false);
        }

        let dest = self.final_dir.join(format!("{}.jpg", hash));
        move_file(path, &dest)?;
        self.seen.insert(hash);
        self.claimed.push(dest);
        Ok(true)
    }

    /// Final frame paths in claim order
    pub fn finish(self) -> Vec<PathBuf> {
        self.claimed
    }
}

/// Regular files directly under `dir`, sorted by filename
pub fn sorted_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Hex SHA-256 of the whole file
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Cross-device: fall back to copy + remove
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
