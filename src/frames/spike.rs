//! Luma spike detection
//!
//! Samples the video at a fixed frame stride, converts each sample to grayscale
//! and records a timestamp whenever the mean absolute difference to the previous
//! sample jumps above the threshold, at most once per suppression window.

use std::ffi::OsString;
use std::path::Path;
use tokio::io::AsyncReadExt;

use super::ffmpeg::{VideoProbe, spawn_ffmpeg_pipe};
use crate::config::SpikeConfig;
use crate::error::PipelineError;
use crate::models::round_to;

/// Streaming spike detector over grayscale frames
pub struct SpikeDetector {
    config: SpikeConfig,
    prev: Option<Vec<u8>>,
    last_spike: f64,
    spikes: Vec<f64>,
}

impl SpikeDetector {
    pub fn new(config: SpikeConfig) -> Self {
        Self {
            config,
            prev: None,
            last_spike: -config.suppression_window,
            spikes: Vec::new(),
        }
    }

    /// Frame-index stride between samples; never zero
    pub fn stride(fps: f64, sample_interval: f64) -> u64 {
        ((fps * sample_interval).round() as u64).max(1)
    }

    /// Feed the next sampled frame (8-bit luma, row-major) taken at `timestamp` seconds.
    pub fn push(&mut self, timestamp: f64, gray: &[u8]) {
        if let Some(prev) = self.prev.as_mut() {
            let delta = mean_abs_diff(prev, gray);
            if delta > self.config.diff_threshold
                && timestamp - self.last_spike >= self.config.suppression_window
            {
                self.spikes.push(round_to(timestamp, 2));
                self.last_spike = timestamp;
            }
            prev.clear();
            prev.extend_from_slice(gray);
        } else {
            self.prev = Some(gray.to_vec());
        }
    }

    pub fn spikes(&self) -> &[f64] {
        &self.spikes
    }

    pub fn finish(self) -> Vec<f64> {
        self.spikes
    }
}

/// Mean absolute per-pixel difference; frames of different size never match
pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return if a.len() == b.len() { 0.0 } else { f64::MAX };
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| u64::from(x.abs_diff(*y)))
        .sum();
    total as f64 / a.len() as f64
}

/// `select` filter keeping every `stride`-th decoded frame, then luma only
pub fn spike_filter(stride: u64) -> String {
    format!("select='not(mod(n\\,{}))',format=gray", stride)
}

/// Scan `video` and return spike timestamps in seconds (two decimals).
///
/// A source without a usable frame rate or frame size yields no spikes.
pub async fn detect_luma_spikes(
    video: &Path,
    probe: &VideoProbe,
    config: SpikeConfig,
) -> Result<Vec<f64>, PipelineError> {
    if !probe.fps.is_finite() || probe.fps <= 0.0 || probe.width == 0 || probe.height == 0 {
        return Ok(Vec::new());
    }

    let stride = SpikeDetector::stride(probe.fps, config.sample_interval);
    let frame_len = probe.width as usize * probe.height as usize;

    // Probe dimensions are pre-rotation, so keep ffmpeg from rotating
    let filter = spike_filter(stride);
    let mut args: Vec<OsString> = vec!["-noautorotate".into(), "-i".into(), video.into()];
    args.extend(
        [
            "-an",
            "-sn",
            "-vf",
            filter.as_str(),
            "-vsync",
            "vfr",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "gray",
            "pipe:1",
        ]
        .iter()
        .map(OsString::from),
    );

    let mut child = spawn_ffmpeg_pipe(args)?;
    let mut stdout = child.stdout.take().ok_or_else(|| PipelineError::Ffmpeg {
        label: "spike-detect".to_string(),
        stderr: "stdout not captured".to_string(),
    })?;

    let mut detector = SpikeDetector::new(config);
    let mut frame = vec![0u8; frame_len];
    let mut sample: u64 = 0;
    loop {
        match stdout.read_exact(&mut frame).await {
            Ok(_) => {
                let timestamp = (sample * stride) as f64 / probe.fps;
                detector.push(timestamp, &frame);
                sample += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    let status = child.wait().await?;
    if !status.success() && sample == 0 {
        return Err(PipelineError::Ffmpeg {
            label: "spike-detect".to_string(),
            stderr: format!("exited with {}", status),
        });
    }

    log::debug!(
        "[frames] Spike scan: {} samples (stride {}), {} spikes",
        sample,
        stride,
        detector.spikes().len()
    );
    Ok(detector.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> Vec<u8> {
        vec![value; 16]
    }

    #[test]
    fn test_stride_rounds_and_never_zero() {
        assert_eq!(SpikeDetector::stride(30.0, 0.1), 3);
        assert_eq!(SpikeDetector::stride(29.97, 0.1), 3);
        assert_eq!(SpikeDetector::stride(25.0, 0.1), 3);
        assert_eq!(SpikeDetector::stride(4.0, 0.1), 1);
    }

    #[test]
    fn test_mean_abs_diff() {
        assert_eq!(mean_abs_diff(&flat(10), &flat(30)), 20.0);
        assert_eq!(mean_abs_diff(&flat(30), &flat(10)), 20.0);
        assert_eq!(mean_abs_diff(&[0, 100], &[100, 100]), 50.0);
    }

    #[test]
    fn test_detects_abrupt_change() {
        let mut detector = SpikeDetector::new(SpikeConfig::default());
        detector.push(0.0, &flat(10));
        detector.push(0.1, &flat(12));
        detector.push(0.2, &flat(200));
        detector.push(0.3, &flat(201));
        assert_eq!(detector.finish(), vec![0.2]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut detector = SpikeDetector::new(SpikeConfig::default());
        detector.push(0.0, &flat(0));
        detector.push(0.1, &flat(15));
        assert!(detector.finish().is_empty());
    }

    #[test]
    fn test_suppression_window() {
        let mut detector = SpikeDetector::new(SpikeConfig::default());
        detector.push(0.0, &flat(0));
        detector.push(0.1, &flat(100)); // spike
        detector.push(0.5, &flat(0)); // suppressed
        detector.push(1.0, &flat(100)); // 0.9s after last spike, suppressed
        detector.push(1.1, &flat(0)); // 1.0s after, recorded
        assert_eq!(detector.finish(), vec![0.1, 1.1]);
    }

    #[test]
    fn test_first_frame_can_spike_immediately() {
        let mut detector = SpikeDetector::new(SpikeConfig::default());
        detector.push(0.0, &flat(0));
        detector.push(0.0, &flat(255));
        assert_eq!(detector.finish(), vec![0.0]);
    }

    #[test]
    fn test_timestamps_rounded_to_two_decimals() {
        let mut detector = SpikeDetector::new(SpikeConfig::default());
        detector.push(0.0, &flat(0));
        detector.push(10.0 / 3.0, &flat(255));
        assert_eq!(detector.finish(), vec![3.33]);
    }

    #[test]
    fn test_spike_filter_expression() {
        assert_eq!(spike_filter(3), "select='not(mod(n\\,3))',format=gray");
    }

    #[tokio::test]
    async fn test_zero_fps_yields_no_spikes() {
        let probe = VideoProbe {
            width: 640,
            height: 360,
            fps: 0.0,
            frame_count: 100,
        };
        let spikes = detect_luma_spikes(Path::new("/nonexistent.mp4"), &probe, SpikeConfig::default())
            .await
            .unwrap();
        assert!(spikes.is_empty());
    }
}
