//! In-memory source replaying a fixed script of reads
//!
//! Used to drive the pipeline from frames that were decoded elsewhere and to
//! exercise failure handling deterministically.

use async_trait::async_trait;
use image::RgbImage;
use std::collections::VecDeque;

use super::{FrameSource, SourceKind};
use crate::analytics::FrameDimensions;
use crate::error::SourceError;

/// One scripted outcome of `read_frame`
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Frame(RgbImage),
    /// Transient read failure
    Fail(String),
    /// End of stream
    End,
}

pub struct MemorySource {
    uri: String,
    kind: SourceKind,
    dimensions: FrameDimensions,
    fps: Option<f64>,
    script: VecDeque<ScriptedRead>,
    /// Outcomes of upcoming reconnect attempts; empty means success
    reconnect_failures: VecDeque<String>,
    reconnects: u32,
    closed: bool,
}

impl MemorySource {
    pub fn new(uri: impl Into<String>, kind: SourceKind, dimensions: FrameDimensions) -> Self {
        Self {
            uri: uri.into(),
            kind,
            dimensions,
            fps: None,
            script: VecDeque::new(),
            reconnect_failures: VecDeque::new(),
            reconnects: 0,
            closed: false,
        }
    }

    /// File source of `count` blank frames
    pub fn blank_file(
        uri: impl Into<String>,
        dimensions: FrameDimensions,
        fps: f64,
        count: usize,
    ) -> Self {
        let mut source = Self::new(uri, SourceKind::File, dimensions).with_fps(fps);
        for _ in 0..count {
            source.push_frame(RgbImage::new(dimensions.width, dimensions.height));
        }
        source
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn push(&mut self, read: ScriptedRead) {
        self.script.push_back(read);
    }

    pub fn push_frame(&mut self, frame: RgbImage) {
        self.push(ScriptedRead::Frame(frame));
    }

    /// Append a blank frame of the bound dimensions
    pub fn push_blank(&mut self) {
        self.push_frame(RgbImage::new(self.dimensions.width, self.dimensions.height));
    }

    pub fn push_failure(&mut self, reason: impl Into<String>) {
        self.push(ScriptedRead::Fail(reason.into()));
    }

    /// Make the next reconnect attempt fail with `reason`
    pub fn fail_next_reconnect(&mut self, reason: impl Into<String>) {
        self.reconnect_failures.push_back(reason.into());
    }

    /// Reconnect attempts made so far, failed ones included
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl FrameSource for MemorySource {
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
        if self.closed {
            return Err(SourceError::read_failed(&self.uri, "source is closed"));
        }

        match self.script.pop_front() {
            Some(ScriptedRead::Frame(frame)) => {
                if frame.dimensions() != (self.dimensions.width, self.dimensions.height) {
                    let reason = format!(
                        "frame is {:?}, source is bound to {:?}",
                        frame.dimensions(),
                        self.dimensions
                    );
                    return Err(SourceError::malformed(&self.uri, reason));
                }
                Ok(Some(frame))
            }
            Some(ScriptedRead::Fail(reason)) => Err(SourceError::read_failed(&self.uri, reason)),
            Some(ScriptedRead::End) | None => Ok(None),
        }
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        self.reconnects += 1;
        match self.reconnect_failures.pop_front() {
            Some(reason) => Err(SourceError::unavailable(&self.uri, reason)),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_script_in_order() {
        let dims = FrameDimensions::new(4, 2);
        let mut source = MemorySource::new("mem://test", SourceKind::Live, dims);
        source.push_blank();
        source.push_failure("dropped");
        source.push(ScriptedRead::End);

        assert!(source.read_frame().await.unwrap().is_some());
        assert!(matches!(
            source.read_frame().await,
            Err(SourceError::ReadFailed { .. })
        ));
        assert!(source.read_frame().await.unwrap().is_none());
        // exhausted script behaves like end of stream
        assert!(source.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_mismatched_frames() {
        let mut source =
            MemorySource::new("mem://test", SourceKind::File, FrameDimensions::new(4, 2));
        source.push_frame(RgbImage::new(2, 2));
        assert!(matches!(
            source.read_frame().await,
            Err(SourceError::MalformedFrame { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_and_reconnect() {
        let mut source =
            MemorySource::blank_file("mem://clip", FrameDimensions::new(2, 2), 30.0, 1);
        source.reconnect().await.unwrap();
        assert_eq!(source.reconnects(), 1);

        source.close().await;
        assert!(source.is_closed());
        assert!(source.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_reconnect_failure() {
        let mut source =
            MemorySource::new("mem://live", SourceKind::Live, FrameDimensions::new(2, 2));
        source.fail_next_reconnect("host unreachable");

        let err = source.reconnect().await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
        assert!(err.to_string().contains("host unreachable"));

        source.reconnect().await.unwrap();
        assert_eq!(source.reconnects(), 2);
    }
}
