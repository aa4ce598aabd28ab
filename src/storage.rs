//! Remote media acquisition.
//!
//! Downloads never fail loudly: any problem (bad URL, network error, non-2xx,
//! size limit) yields `None` and the caller skips the job.

use futures::future::BoxFuture;
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::constants::{UNKNOWN_EXTENSION, is_image_extension, is_video_extension};

/// Fetches a URL into a directory, enforcing a byte ceiling.
pub trait Downloader: Send + Sync {
    /// Returns the written path, or `None` on any failure.
    fn download<'a>(
        &'a self,
        url: &'a str,
        dest_dir: &'a Path,
        filename: Option<&'a str>,
        max_bytes: u64,
    ) -> BoxFuture<'a, Option<PathBuf>>;
}

/// HTTP(S) downloader backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    http: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        filename: Option<&str>,
        max_bytes: u64,
    ) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err("Invalid URL scheme".into());
        }

        let path = dest_dir.join(local_filename(&parsed, filename));

        let mut response = self.http.get(parsed).send().await?.error_for_status()?;
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err("File exceeds size limit".into());
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let written = stream_to_file(&mut response, &mut file, max_bytes).await;
        drop(file);

        if let Err(e) = written {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                log::warn!("[download] Failed to remove partial file {}: {}", path.display(), rm);
            }
            return Err(e);
        }

        Ok(path)
    }
}

async fn stream_to_file(
    response: &mut reqwest::Response,
    file: &mut tokio::fs::File,
    max_bytes: u64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut total: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        total += chunk.len() as u64;
        if total > max_bytes {
            return Err("File exceeds size limit".into());
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

impl Downloader for HttpDownloader {
    fn download<'a>(
        &'a self,
        url: &'a str,
        dest_dir: &'a Path,
        filename: Option<&'a str>,
        max_bytes: u64,
    ) -> BoxFuture<'a, Option<PathBuf>> {
        Box::pin(async move {
            match self.fetch(url, dest_dir, filename, max_bytes).await {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("[download] {} failed: {}", url, e);
                    None
                }
            }
        })
    }
}

/// `{filename}{ext}` where ext comes from the URL path, or a random stem if no
/// filename is given. Unrecognised extensions become `.bin`.
fn local_filename(url: &Url, filename: Option<&str>) -> String {
    let ext = Path::new(url.path())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .filter(|e| is_image_extension(e) || is_video_extension(e))
        .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string());

    match filename {
        Some(stem) => format!("{}{}", stem, ext),
        None => format!("{:016x}{}", rand::random::<u64>(), ext),
    }
}

/// Lowercased extension of `path` including the dot, or empty.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_filename_keeps_known_extension() {
        let url = Url::parse("https://cdn.example.com/a/b/clip.MP4?sig=1").unwrap();
        assert_eq!(local_filename(&url, Some("video")), "video.mp4");

        let url = Url::parse("https://cdn.example.com/photo.webp").unwrap();
        assert_eq!(local_filename(&url, Some("job-1")), "job-1.webp");
    }

    #[test]
    fn test_local_filename_unknown_extension() {
        let url = Url::parse("https://cdn.example.com/download?id=3").unwrap();
        assert_eq!(local_filename(&url, Some("job-1")), "job-1.bin");

        let url = Url::parse("https://cdn.example.com/file.exe").unwrap();
        let name = local_filename(&url, None);
        assert!(name.ends_with(".bin"));
        assert_eq!(name.len(), 16 + 4);
    }

    #[test]
    fn test_dotted_extension() {
        assert_eq!(dotted_extension(Path::new("/x/y.JPG")), ".jpg");
        assert_eq!(dotted_extension(Path::new("/x/y")), "");
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpDownloader::new(Duration::from_secs(5)).unwrap();
        assert!(
            downloader
                .download("ftp://example.com/a.jpg", dir.path(), Some("a"), 1024)
                .await
                .is_none()
        );
        assert!(
            downloader
                .download("not a url", dir.path(), Some("a"), 1024)
                .await
                .is_none()
        );
    }
}
