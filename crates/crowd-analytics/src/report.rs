//! Report sinks for analyzed frames
//!
//! Per-frame [`CrowdReport`]s and the final [`SessionSummary`] are handed to a
//! sink: a JSON-lines writer (file or stdout) or an in-process channel.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use common::crowd::{CrowdReport, SessionSummary};
use serde::Serialize;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

/// Destination for pipeline output
#[async_trait]
pub trait ReportSink: Send {
    async fn publish(&mut self, report: &CrowdReport) -> Result<()>;

    async fn publish_summary(&mut self, summary: &SessionSummary) -> Result<()>;
}

/// Tagged record written by [`JsonLinesSink`]
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Frame(&'a CrowdReport),
    Summary(&'a SessionSummary),
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    async fn write_record(&mut self, record: &Record<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("failed to serialize report")?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .context("failed to write report")?;
        self.writer.flush().await.context("failed to flush report")?;
        Ok(())
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl JsonLinesSink<tokio::fs::File> {
    /// Append to `path`, creating it when missing
    pub async fn append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open report file {}", path.display()))?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ReportSink for JsonLinesSink<W> {
    async fn publish(&mut self, report: &CrowdReport) -> Result<()> {
        self.write_record(&Record::Frame(report)).await
    }

    async fn publish_summary(&mut self, summary: &SessionSummary) -> Result<()> {
        self.write_record(&Record::Summary(summary)).await
    }
}

/// Output delivered through [`ChannelSink`]
#[derive(Debug, Clone)]
pub enum ReportEvent {
    Frame(CrowdReport),
    Summary(SessionSummary),
}

/// Forwards reports to an in-process consumer; a full channel applies backpressure
pub struct ChannelSink {
    tx: mpsc::Sender<ReportEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ReportEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReportEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ReportSink for ChannelSink {
    async fn publish(&mut self, report: &CrowdReport) -> Result<()> {
        self.tx
            .send(ReportEvent::Frame(report.clone()))
            .await
            .map_err(|_| anyhow!("report receiver dropped"))
    }

    async fn publish_summary(&mut self, summary: &SessionSummary) -> Result<()> {
        self.tx
            .send(ReportEvent::Summary(summary.clone()))
            .await
            .map_err(|_| anyhow!("report receiver dropped"))
    }
}
