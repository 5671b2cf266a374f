//! Frame pipeline
//!
//! Pulls frames from a [`FrameSource`], samples every Nth one, runs the
//! [`Detector`] and the [`CrowdAnalyzer`] on it and yields one
//! [`FrameResult`] per analyzed frame. Live sources are reconnected after a
//! backoff on failure; the analyzer and its motion history survive the
//! reconnect.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::crowd::{CrowdMetrics, CrowdReport, Detection, RiskLevel, SessionSummary};
use image::RgbImage;
use std::path::{Path, PathBuf};
use telemetry::metrics::{
    CROWD_ACTIVE_PIPELINES, CROWD_ANALYSIS_LATENCY, CROWD_DETECTOR_ERRORS, CROWD_FRAMES_ANALYZED,
    CROWD_FRAMES_READ, CROWD_OVERLAY_FAILURES, CROWD_PEOPLE_COUNT, CROWD_RISK_EVENTS,
    CROWD_RISK_SCORE, CROWD_SOURCE_RECONNECTS,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analytics::CrowdAnalyzer;
use crate::config::{AnalyticsConfig, PipelineConfig};
use crate::detector::Detector;
use crate::overlay;
use crate::report::ReportSink;
use crate::source::{FrameSource, SourceKind};

/// Output for one analyzed frame
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Position of the frame in its source, counting skipped frames
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
    pub metrics: CrowdMetrics,
    /// Present when overlay rendering is enabled and succeeded
    pub annotated_frame: Option<RgbImage>,
}

pub struct FramePipeline<S, D> {
    source: S,
    detector: D,
    analyzer: CrowdAnalyzer,
    config: PipelineConfig,
    cancel: CancellationToken,
    next_index: u64,
    frames_analyzed: u64,
    reconnects: u64,
    last_processed: Option<Instant>,
    finished: bool,
}

impl<S: FrameSource, D: Detector> FramePipeline<S, D> {
    /// Bind a fresh analyzer to the source dimensions
    pub fn new(
        source: S,
        detector: D,
        analytics: AnalyticsConfig,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate().context("invalid pipeline config")?;
        let analyzer = CrowdAnalyzer::new(source.dimensions(), analytics)?;
        Ok(Self {
            source,
            detector,
            analyzer,
            config,
            cancel,
            next_index: 0,
            frames_analyzed: 0,
            reconnects: 0,
            last_processed: None,
            finished: false,
        })
    }

    pub fn analyzer(&self) -> &CrowdAnalyzer {
        &self.analyzer
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reconnect attempts made so far
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    /// Next analyzed frame; `None` once the source is exhausted, the
    /// pipeline is cancelled or `max_frames` is reached
    pub async fn next_result(&mut self) -> Result<Option<FrameResult>> {
        loop {
            if self.finished || self.cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(max) = self.config.max_frames {
                if self.frames_analyzed >= max {
                    debug!(max_frames = max, "frame limit reached");
                    self.finished = true;
                    return Ok(None);
                }
            }

            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                read = self.source.read_frame() => read,
            };
            let read_at = Instant::now();
            let kind = self.source.kind();

            match read {
                Ok(Some(frame)) => {
                    let frame_index = self.next_index;
                    self.next_index += 1;
                    CROWD_FRAMES_READ.with_label_values(&[kind.as_str()]).inc();

                    if frame_index % self.config.frame_sample_rate as u64 != 0 {
                        continue;
                    }

                    if let Some(result) = self.process(frame, frame_index, read_at).await? {
                        return Ok(Some(result));
                    }
                }
                Ok(None) => match kind {
                    SourceKind::File => {
                        info!(
                            source = %self.source.uri(),
                            frames_read = self.next_index,
                            frames_analyzed = self.frames_analyzed,
                            "source exhausted"
                        );
                        self.finished = true;
                        return Ok(None);
                    }
                    SourceKind::Live => {
                        if !self.recover("stream ended unexpectedly").await {
                            return Ok(None);
                        }
                    }
                },
                Err(e) => match kind {
                    SourceKind::File => {
                        self.finished = true;
                        return Err(e).with_context(|| {
                            format!("failed to read frame {} from file source", self.next_index)
                        });
                    }
                    SourceKind::Live => {
                        if !self.recover(&e.to_string()).await {
                            return Ok(None);
                        }
                    }
                },
            }
        }
    }

    /// Wait out the backoff and reconnect; `false` when cancelled meanwhile
    async fn recover(&mut self, reason: &str) -> bool {
        warn!(
            source = %self.source.uri(),
            reason = %reason,
            backoff_secs = self.config.reconnect_backoff.as_secs_f64(),
            "live source failed, reconnecting after backoff"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
        }

        self.reconnects += 1;
        CROWD_SOURCE_RECONNECTS
            .with_label_values(&[self.config.camera_id.as_str()])
            .inc();

        match self.source.reconnect().await {
            Ok(()) => info!(
                source = %self.source.uri(),
                attempt = self.reconnects,
                "live source reconnected"
            ),
            Err(e) => warn!(
                source = %self.source.uri(),
                attempt = self.reconnects,
                error = %e,
                "reconnect attempt failed"
            ),
        }
        true
    }

    fn time_delta(&mut self, read_at: Instant) -> f64 {
        let default = self.analyzer.config().default_time_delta;
        match self.source.kind() {
            SourceKind::File => match self.source.fps() {
                Some(fps) if fps > 0.0 => self.config.frame_sample_rate as f64 / fps,
                _ => default,
            },
            SourceKind::Live => {
                let delta = self
                    .last_processed
                    .map(|previous| read_at.duration_since(previous).as_secs_f64())
                    .unwrap_or(default);
                self.last_processed = Some(read_at);
                delta
            }
        }
    }

    /// Analyze one sampled frame; `None` when a live frame had to be skipped
    async fn process(
        &mut self,
        frame: RgbImage,
        frame_index: u64,
        read_at: Instant,
    ) -> Result<Option<FrameResult>> {
        let kind = self.source.kind();
        let timer = CROWD_ANALYSIS_LATENCY
            .with_label_values(&[kind.as_str()])
            .start_timer();

        let detections = match self.detector.detect(&frame, frame_index).await {
            Ok(detections) => detections,
            Err(e) => {
                CROWD_DETECTOR_ERRORS
                    .with_label_values(&[self.detector.id()])
                    .inc();
                CROWD_FRAMES_ANALYZED
                    .with_label_values(&[kind.as_str(), "detector_error"])
                    .inc();
                timer.stop_and_discard();

                if kind == SourceKind::File {
                    self.finished = true;
                    return Err(e)
                        .with_context(|| format!("detection failed on frame {}", frame_index));
                }
                warn!(
                    frame_index,
                    detector = self.detector.id(),
                    error = %e,
                    "detection failed, skipping frame"
                );
                return Ok(None);
            }
        };

        let time_delta = self.time_delta(read_at);
        let timestamp = Utc::now();
        let metrics = self
            .analyzer
            .analyze_with_delta(&detections, timestamp, time_delta);

        let annotated_frame = if self.config.render_overlay {
            match overlay::render(&frame, &detections, &metrics) {
                Ok(annotated) => Some(annotated),
                Err(e) => {
                    CROWD_OVERLAY_FAILURES.inc();
                    warn!(frame_index, error = %e, "failed to render overlay");
                    None
                }
            }
        } else {
            None
        };

        timer.observe_duration();
        self.frames_analyzed += 1;
        CROWD_FRAMES_ANALYZED
            .with_label_values(&[kind.as_str(), "success"])
            .inc();

        debug!(
            frame_index,
            people = metrics.total_count,
            risk_level = %metrics.risk_level,
            risk_score = metrics.risk_score,
            time_delta,
            "frame analyzed"
        );

        Ok(Some(FrameResult {
            frame_index,
            timestamp,
            detections,
            metrics,
            annotated_frame,
        }))
    }

    /// Drive the pipeline to completion, publishing every report and the
    /// final summary to `sink`. The source is closed afterwards.
    pub async fn run<K: ReportSink + ?Sized>(&mut self, sink: &mut K) -> Result<SessionSummary> {
        CROWD_ACTIVE_PIPELINES.inc();
        let result = self.run_to_end(sink).await;
        CROWD_ACTIVE_PIPELINES.dec();
        self.source.close().await;
        result
    }

    async fn run_to_end<K: ReportSink + ?Sized>(&mut self, sink: &mut K) -> Result<SessionSummary> {
        info!(
            source = %self.source.uri(),
            kind = self.source.kind().as_str(),
            camera_id = %self.config.camera_id,
            sample_rate = self.config.frame_sample_rate,
            "starting crowd analysis"
        );

        if let Some(dir) = &self.config.annotated_output_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut summary = SessionSummary::new(&self.config.location, &self.config.camera_id);

        while let Some(result) = self.next_result().await? {
            let report = CrowdReport::from_metrics(
                &result.metrics,
                result.frame_index,
                &self.config.location,
                &self.config.camera_id,
            );
            self.record_metrics(&report);

            sink.publish(&report).await.with_context(|| {
                format!("failed to publish report for frame {}", report.frame_index)
            })?;

            if let (Some(dir), Some(annotated)) =
                (&self.config.annotated_output_dir, result.annotated_frame)
            {
                save_annotated(dir, result.frame_index, annotated).await?;
            }

            summary.record(&report);
        }

        summary.reconnects = self.reconnects;
        sink.publish_summary(&summary)
            .await
            .context("failed to publish session summary")?;

        info!(
            frames_analyzed = summary.frames_analyzed,
            total_sum = summary.total_sum,
            peak_count = ?summary.peak.as_ref().map(|p| p.total_count),
            reconnects = summary.reconnects,
            "crowd analysis finished"
        );

        Ok(summary)
    }

    fn record_metrics(&self, report: &CrowdReport) {
        let camera = self.config.camera_id.as_str();
        CROWD_PEOPLE_COUNT
            .with_label_values(&[camera])
            .set(report.total_count as i64);
        CROWD_RISK_SCORE
            .with_label_values(&[camera])
            .set(report.risk_score);

        if matches!(report.risk_level, RiskLevel::High | RiskLevel::Critical) {
            CROWD_RISK_EVENTS
                .with_label_values(&[report.risk_level.as_str(), report.anomaly_type.as_str()])
                .inc();
            warn!(
                camera_id = %camera,
                frame_index = report.frame_index,
                risk_level = %report.risk_level,
                anomaly = %report.anomaly_type,
                people = report.total_count,
                "elevated crowd risk"
            );
        }
    }
}

/// Path of the annotated JPEG for one frame
pub fn annotated_path(dir: &Path, frame_index: u64) -> PathBuf {
    dir.join(format!("frame_{:06}.jpg", frame_index))
}

async fn save_annotated(dir: &Path, frame_index: u64, annotated: RgbImage) -> Result<()> {
    let path = annotated_path(dir, frame_index);
    let target = path.clone();
    tokio::task::spawn_blocking(move || annotated.save(&target))
        .await
        .context("annotated frame writer panicked")?
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
