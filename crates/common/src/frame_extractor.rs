//! FFmpeg helpers for decoding video sources into raw frames
//!
//! Probing goes through `ffprobe`; decoding is left to an `ffmpeg` child
//! process whose arguments are built here so every caller decodes the same way.

use anyhow::{Context, Result};
use std::process::Command;
use tracing::debug;

/// Stream properties reported by ffprobe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    /// Frames per second, `None` when the container does not report a usable rate
    pub fps: Option<f64>,
}

/// Probe width, height and frame rate of the first video stream
pub fn probe_video(source_uri: &str) -> Result<VideoProbe> {
    debug!(source = %source_uri, "probing video stream");

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate",
            "-of",
            "csv=p=0",
            source_uri,
        ])
        .output()
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        anyhow::bail!("ffprobe failed: {:?}", output.status);
    }

    let output_str =
        String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    let probe = parse_probe_output(&output_str)?;

    debug!(
        source = %source_uri,
        width = probe.width,
        height = probe.height,
        fps = ?probe.fps,
        "probed video stream"
    );

    Ok(probe)
}

/// Parse `width,height,num/den` as printed by ffprobe's csv writer
pub fn parse_probe_output(output: &str) -> Result<VideoProbe> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .context("ffprobe returned no video stream")?;

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 2 {
        anyhow::bail!("unexpected ffprobe output format: {}", line);
    }

    let width: u32 = fields[0].parse().context("failed to parse width")?;
    let height: u32 = fields[1].parse().context("failed to parse height")?;
    let fps = fields.get(2).and_then(|rate| parse_frame_rate(rate));

    Ok(VideoProbe { width, height, fps })
}

/// Parse an ffprobe rational frame rate ("30000/1001") or plain number
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let rate = rate.trim();
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };

    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Arguments for an ffmpeg process that writes packed RGB24 frames of a fixed
/// size to stdout
pub fn raw_video_args(source_uri: &str, width: u32, height: u32) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()];

    if source_uri.starts_with("rtsp://") {
        args.push("-rtsp_transport".to_string());
        args.push("tcp".to_string());
    }

    args.extend([
        "-i".to_string(),
        source_uri.to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", width, height),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "pipe:1".to_string(),
    ]);

    args
}

/// Size in bytes of one RGB24 frame
pub fn rgb_frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let probe = parse_probe_output("1280,720,30/1\n").unwrap();
        assert_eq!(probe.width, 1280);
        assert_eq!(probe.height, 720);
        assert_eq!(probe.fps, Some(30.0));

        let no_rate = parse_probe_output("640,480\n").unwrap();
        assert_eq!(no_rate.fps, None);

        assert!(parse_probe_output("").is_err());
        assert!(parse_probe_output("wide,tall,1/1").is_err());
    }

    #[test]
    fn test_raw_video_args_rtsp_transport() {
        let args = raw_video_args("rtsp://cam/stream", 640, 360);
        assert!(args.windows(2).any(|w| w[0] == "-rtsp_transport" && w[1] == "tcp"));
        assert!(args.contains(&"scale=640:360".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));

        let file_args = raw_video_args("crowd.mp4", 640, 360);
        assert!(!file_args.contains(&"-rtsp_transport".to_string()));
    }

    #[test]
    fn test_rgb_frame_len() {
        assert_eq!(rgb_frame_len(1280, 720), 2_764_800);
    }
}
