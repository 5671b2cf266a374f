//! Crowd analytics engine
//!
//! [`CrowdAnalyzer`] composes density scoring, zone detection, clustering,
//! motion estimation and risk classification into one `analyze` call. One
//! analyzer is bound to the fixed frame dimensions of one source and owns that
//! source's cross-frame motion history.

pub mod clustering;
pub mod density;
pub mod motion;
pub mod risk;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::crowd::{CrowdMetrics, Detection, Point};
use tracing::trace;

use crate::config::AnalyticsConfig;
use clustering::ClusterDetector;
use density::DensityEstimator;
use motion::MotionEstimator;
use risk::RiskClassifier;

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

pub struct CrowdAnalyzer {
    dimensions: FrameDimensions,
    config: AnalyticsConfig,
    density: DensityEstimator,
    clusters: ClusterDetector,
    motion: MotionEstimator,
    risk: RiskClassifier,
    previous_timestamp: Option<DateTime<Utc>>,
}

impl CrowdAnalyzer {
    /// Bind an analyzer to one source; rejects configs that would divide by
    /// zero or push scores out of range
    pub fn new(dimensions: FrameDimensions, config: AnalyticsConfig) -> Result<Self> {
        config.validate().context("invalid analytics config")?;
        Ok(Self {
            dimensions,
            density: DensityEstimator::new(dimensions.width, dimensions.height, &config),
            clusters: ClusterDetector::new(&config),
            motion: MotionEstimator::new(&config),
            risk: RiskClassifier::new(&config),
            previous_timestamp: None,
            config,
        })
    }

    pub fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn frame_area(&self) -> u64 {
        self.density.frame_area()
    }

    pub fn grid_size(&self) -> u32 {
        self.config.grid_size
    }

    /// Positions remembered from the last analyzed frame
    pub fn previous_positions(&self) -> Option<&[Point]> {
        self.motion.previous_positions()
    }

    pub fn previous_timestamp(&self) -> Option<DateTime<Utc>> {
        self.previous_timestamp
    }

    /// Analyze one frame assuming the configured default time step
    pub fn analyze(&mut self, detections: &[Detection], timestamp: DateTime<Utc>) -> CrowdMetrics {
        let time_delta = self.config.default_time_delta;
        self.analyze_with_delta(detections, timestamp, time_delta)
    }

    /// Analyze one frame; `time_delta` is the seconds elapsed since the
    /// previously analyzed frame of the same source
    pub fn analyze_with_delta(
        &mut self,
        detections: &[Detection],
        timestamp: DateTime<Utc>,
        time_delta: f64,
    ) -> CrowdMetrics {
        let centers: Vec<Point> = detections.iter().map(|d| d.center).collect();
        let total_count = centers.len();

        let density_score = self.density.density_score(total_count);
        let zones = self.density.zones(&centers);
        let clusters = self.clusters.detect(&centers);
        let avg_velocity = self.motion.estimate(&centers, time_delta);

        let risk = self
            .risk
            .classify(total_count, density_score, &zones, avg_velocity);

        self.previous_timestamp = Some(timestamp);

        trace!(
            total_count,
            density_score,
            zones = zones.len(),
            clusters = clusters.len(),
            avg_velocity,
            risk_score = risk.score,
            "analyzed frame"
        );

        CrowdMetrics {
            total_count,
            density_score,
            risk_level: risk.level,
            risk_score: risk.score,
            anomaly_type: risk.anomaly,
            underlying_anomaly: risk.underlying_anomaly,
            zones,
            clusters,
            avg_velocity: round2(avg_velocity),
            frame_area: self.frame_area(),
            timestamp,
        }
    }
}

/// Round to two decimals for reported scores
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
