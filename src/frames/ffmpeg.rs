//! ffmpeg / ffprobe invocation

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::error::PipelineError;

/// Quiet, non-interactive flags every ffmpeg call starts with
const BASE_ARGS: [&str; 5] = ["-hide_banner", "-loglevel", "error", "-nostdin", "-y"];

/// Container facts needed before extraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl VideoProbe {
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }

    /// Parse `ffprobe -of json` output for the first video stream.
    pub fn from_json(raw: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct Output {
            #[serde(default)]
            streams: Vec<Stream>,
            format: Option<Format>,
        }
        #[derive(Deserialize)]
        struct Stream {
            width: Option<u32>,
            height: Option<u32>,
            avg_frame_rate: Option<String>,
            r_frame_rate: Option<String>,
            nb_frames: Option<String>,
        }
        #[derive(Deserialize)]
        struct Format {
            duration: Option<String>,
        }

        let output: Output = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        let stream = output
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| "no video stream".to_string())?;

        let fps = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rational)
            .filter(|f| *f > 0.0)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
            .unwrap_or(0.0);

        let frame_count = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .or_else(|| {
                let duration = output
                    .format
                    .as_ref()
                    .and_then(|f| f.duration.as_deref())
                    .and_then(|d| d.trim().parse::<f64>().ok())?;
                (duration > 0.0 && fps > 0.0).then(|| (duration * fps).round() as u64)
            })
            .unwrap_or(0);

        Ok(Self {
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
            fps,
            frame_count,
        })
    }
}

/// "30000/1001" -> 29.97, "25" -> 25.0; zero denominators are rejected
fn parse_rational(value: &str) -> Option<f64> {
    match value.trim().split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => value.trim().parse().ok(),
    }
}

/// Probe the first video stream of `path`.
pub async fn probe_video(path: &Path) -> Result<VideoProbe, PipelineError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args([
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames:format=duration",
        ])
        .args(["-of", "json"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PipelineError::Probe {
            path: path.to_path_buf(),
            reason: format!("failed to spawn ffprobe: {}", e),
        })?;

    if !output.status.success() {
        return Err(PipelineError::Probe {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    VideoProbe::from_json(&String::from_utf8_lossy(&output.stdout)).map_err(|reason| {
        PipelineError::Probe {
            path: path.to_path_buf(),
            reason,
        }
    })
}

/// Arguments for writing MJPEG stills through the image2 muxer
pub fn jpeg_output_args(threads: usize, output: PathBuf) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-an",
        "-sn",
        "-f",
        "image2",
        "-vcodec",
        "mjpeg",
        "-q:v",
        "3",
        "-pix_fmt",
        "yuvj420p",
        "-threads",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(threads.to_string().into());
    args.push(output.into_os_string());
    args
}

/// Run ffmpeg to completion; a non-zero exit becomes `PipelineError::Ffmpeg`.
pub async fn run_ffmpeg(label: &str, args: Vec<OsString>) -> Result<(), PipelineError> {
    log::debug!("[frames] Running ffmpeg ({})", label);
    let output = Command::new("ffmpeg")
        .args(BASE_ARGS)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::Ffmpeg {
            label: label.to_string(),
            stderr: format!("failed to spawn ffmpeg: {}", e),
        })?;

    if !output.status.success() {
        return Err(PipelineError::Ffmpeg {
            label: label.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    log::debug!("[frames] ffmpeg ({}) done", label);
    Ok(())
}

/// Spawn ffmpeg with stdout piped for streaming raw output.
pub fn spawn_ffmpeg_pipe(args: Vec<OsString>) -> std::io::Result<tokio::process::Child> {
    Command::new("ffmpeg")
        .args(BASE_ARGS)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}
