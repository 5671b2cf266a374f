//! Source decoding any ffmpeg-readable URI (files, RTSP, HLS, ...)
//!
//! The stream is probed once with ffprobe; frames are then read as packed
//! RGB24 from an ffmpeg child process that scales to the probed size, so the
//! dimensions stay fixed across reconnects. A decoder that exits with a
//! failure status is reported as a read failure carrying the tail of its
//! stderr, never as a clean end of stream.

use async_trait::async_trait;
use common::frame_extractor;
use image::RgbImage;
use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FrameSource, SourceKind};
use crate::analytics::FrameDimensions;
use crate::error::SourceError;

/// Decoder stderr lines kept for error messages
const STDERR_TAIL_LINES: usize = 5;

pub struct FfmpegSource {
    uri: String,
    kind: SourceKind,
    dimensions: FrameDimensions,
    fps: Option<f64>,
    frame_len: usize,
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_tail: Option<JoinHandle<String>>,
}

impl FfmpegSource {
    /// Probe and open `uri`; fails fast when the source cannot be opened
    pub async fn open(uri: impl Into<String>, kind: SourceKind) -> Result<Self, SourceError> {
        let uri = uri.into();

        let probe_uri = uri.clone();
        let probe = tokio::task::spawn_blocking(move || frame_extractor::probe_video(&probe_uri))
            .await
            .map_err(|e| SourceError::unavailable(&uri, e))?
            .map_err(|e| SourceError::unavailable(&uri, format!("{:#}", e)))?;

        if probe.width == 0 || probe.height == 0 {
            return Err(SourceError::unavailable(
                &uri,
                format!("zero-sized video stream ({}x{})", probe.width, probe.height),
            ));
        }

        let args = frame_extractor::raw_video_args(&uri, probe.width, probe.height);
        let mut source = Self::with_decoder(
            uri,
            kind,
            FrameDimensions::new(probe.width, probe.height),
            probe.fps,
            "ffmpeg",
            args,
        );
        source.spawn_decoder()?;

        info!(
            source = %source.uri,
            kind = source.kind.as_str(),
            width = probe.width,
            height = probe.height,
            fps = ?probe.fps,
            "opened video source"
        );

        Ok(source)
    }

    /// Source whose frames come from `program` writing packed RGB24 to stdout
    fn with_decoder(
        uri: String,
        kind: SourceKind,
        dimensions: FrameDimensions,
        fps: Option<f64>,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            uri,
            kind,
            dimensions,
            fps,
            frame_len: frame_extractor::rgb_frame_len(dimensions.width, dimensions.height),
            program: program.into(),
            args,
            child: None,
            stdout: None,
            stderr_tail: None,
        }
    }

    fn spawn_decoder(&mut self) -> Result<(), SourceError> {
        debug!(program = %self.program, args = ?self.args, "spawning decoder");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let reason = format!("failed to spawn {}: {}", self.program, e);
                SourceError::unavailable(&self.uri, reason)
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::unavailable(&self.uri, "decoder stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SourceError::unavailable(&self.uri, "decoder stderr was not captured"))?;

        self.child = Some(child);
        self.stdout = Some(stdout);
        self.stderr_tail = Some(tokio::spawn(collect_stderr_tail(stderr)));
        Ok(())
    }

    /// Reap the decoder after its output ended; a failure exit becomes a read error
    async fn finish_decoder(&mut self) -> Result<(), SourceError> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().await.map_err(|e| {
            SourceError::read_failed(&self.uri, format!("failed to wait for decoder: {}", e))
        })?;
        let stderr = match self.stderr_tail.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            return Ok(());
        }

        let mut reason = format!("{} exited with {}", self.program, status);
        if !stderr.is_empty() {
            reason.push_str(": ");
            reason.push_str(&stderr);
        }
        Err(SourceError::read_failed(&self.uri, reason))
    }

    async fn stop_decoder(&mut self) {
        self.stdout = None;
        if let Some(task) = self.stderr_tail.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(source = %self.uri, error = %e, "failed to stop decoder");
            }
        }
    }
}

/// Last few stderr lines of a decoder, joined into one message
async fn collect_stderr_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join(" | ")
}

#[async_trait]
impl FrameSource for FfmpegSource {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    async fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Err(SourceError::read_failed(&self.uri, "decoder is not running"));
        };

        let mut buf = vec![0u8; self.frame_len];
        let read = stdout.read_exact(&mut buf).await;
        match read {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.finish_decoder().await?;
                debug!(source = %self.uri, "decoder reached end of stream");
                return Ok(None);
            }
            Err(e) => return Err(SourceError::read_failed(&self.uri, e)),
        }

        RgbImage::from_raw(self.dimensions.width, self.dimensions.height, buf)
            .map(Some)
            .ok_or_else(|| SourceError::malformed(&self.uri, "frame buffer size mismatch"))
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        self.stop_decoder().await;
        self.spawn_decoder()?;
        info!(source = %self.uri, "reconnected video source");
        Ok(())
    }

    async fn close(&mut self) {
        self.stop_decoder().await;
    }
}
