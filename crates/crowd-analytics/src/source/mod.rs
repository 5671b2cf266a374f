//! Frame sources feeding the pipeline
//!
//! A source yields decoded RGB frames of fixed dimensions. File sources end;
//! live sources may fail transiently and are reconnected by the pipeline.

pub mod ffmpeg;
pub mod memory;

use anyhow::anyhow;
use async_trait::async_trait;
use image::RgbImage;
use std::str::FromStr;

use crate::analytics::FrameDimensions;
use crate::error::SourceError;

pub use ffmpeg::FfmpegSource;
pub use memory::{MemorySource, ScriptedRead};

/// Whether a source is bounded (file) or unbounded (live stream)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Live,
}

const LIVE_SCHEMES: &[&str] = &[
    "rtsp://", "rtsps://", "rtmp://", "http://", "https://", "udp://", "srt://",
];

impl SourceKind {
    /// Guess the kind from a URI scheme; anything without a streaming scheme is a file
    pub fn from_uri(uri: &str) -> Self {
        let lower = uri.to_ascii_lowercase();
        if LIVE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
            SourceKind::Live
        } else {
            SourceKind::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Live => "live",
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(SourceKind::File),
            "live" | "stream" | "rtsp" => Ok(SourceKind::Live),
            other => Err(anyhow!("unknown source kind '{}'", other)),
        }
    }
}

/// Source of decoded frames
#[async_trait]
pub trait FrameSource: Send {
    fn uri(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Fixed frame size for the lifetime of the source
    fn dimensions(&self) -> FrameDimensions;

    /// Nominal frame rate, `None` when unknown
    fn fps(&self) -> Option<f64>;

    /// Read the next frame; `Ok(None)` signals end of stream
    async fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Re-establish the connection after a failure
    async fn reconnect(&mut self) -> Result<(), SourceError>;

    /// Release the underlying decoder or connection
    async fn close(&mut self);
}
