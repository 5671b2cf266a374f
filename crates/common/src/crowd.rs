//! Crowd analytics contracts shared between the analytics engine, the frame
//! pipeline and downstream report consumers.
//!
//! Everything in here is a plain value object: produced once, never mutated
//! after it leaves the component that built it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned box given by its corners (x1, y1) top-left and (x2, y2) bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Single detected person, as returned by the external detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box in frame pixels
    pub bbox: BoundingBox,

    /// Center of the bounding box
    pub center: Point,

    /// Detector confidence (0.0 to 1.0)
    pub confidence: f32,

    /// Bounding box area in square pixels
    pub area: f64,
}

impl Detection {
    /// Build a detection from its box corners, deriving center and area
    pub fn from_bbox(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            center: bbox.center(),
            confidence,
            area: bbox.area(),
        }
    }

    /// Build a detection positioned only by its center (zero-sized box)
    pub fn at(x: f64, y: f64) -> Self {
        Self::from_bbox(BoundingBox::new(x, y, x, y), 1.0)
    }
}

/// Occupancy level of a flagged grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityLevel {
    High,
    Critical,
}

impl DensityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DensityLevel::High => "high",
            DensityLevel::Critical => "critical",
        }
    }
}

/// Grid cell whose occupancy reached the high-density threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityZone {
    /// Cell position as (column, row)
    pub grid_position: (u32, u32),

    /// Cell bounds in frame pixels
    pub bbox: BoundingBox,

    /// Number of detection centers inside the cell
    pub person_count: u32,

    pub density_level: DensityLevel,
}

/// Density-connected group of detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Label valid only within the analysis call that produced it
    pub id: u32,

    /// Number of member points
    pub size: usize,

    /// Centroid of the member points
    pub center: Point,

    /// Component-wise min/max of the member points
    pub bbox: BoundingBox,

    /// Area of `bbox` in square pixels
    pub area: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dominant risk driver for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    SuddenMovement,
    HighDensity,
    Clustering,
    RushBehavior,
    Normal,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::SuddenMovement => "sudden_movement",
            AnomalyType::HighDensity => "high_density",
            AnomalyType::Clustering => "clustering",
            AnomalyType::RushBehavior => "rush_behavior",
            AnomalyType::Normal => "normal",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of analyzing one frame's detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrowdMetrics {
    pub total_count: usize,

    /// Normalized density (0-100)
    pub density_score: f64,

    pub risk_level: RiskLevel,

    /// Weighted risk (0-100)
    pub risk_score: f64,

    /// Final anomaly label (forced to `RushBehavior` on critical risk)
    pub anomaly_type: AnomalyType,

    /// Anomaly label before the critical-risk override
    pub underlying_anomaly: AnomalyType,

    pub zones: Vec<DensityZone>,

    /// Ordered by size, largest first
    pub clusters: Vec<Cluster>,

    /// Mean matched velocity in pixels per second
    pub avg_velocity: f64,

    /// Frame area in square pixels
    pub frame_area: u64,

    pub timestamp: DateTime<Utc>,
}

/// Flat record handed to downstream consumers (storage, alerting, reasoning)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrowdReport {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub camera_id: String,
    pub frame_index: u64,
    pub total_count: usize,
    pub density_score: f64,
    /// Not measured by this pipeline, kept for consumer compatibility
    pub flow_rate: f64,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub anomaly_type: AnomalyType,
    pub underlying_anomaly: AnomalyType,
    pub avg_velocity: f64,
    pub high_density_zones: Vec<DensityZone>,
    pub clusters: Vec<Cluster>,
}

impl CrowdReport {
    pub fn from_metrics(
        metrics: &CrowdMetrics,
        frame_index: u64,
        location: impl Into<String>,
        camera_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: metrics.timestamp,
            location: location.into(),
            camera_id: camera_id.into(),
            frame_index,
            total_count: metrics.total_count,
            density_score: metrics.density_score,
            flow_rate: 0.0,
            risk_level: metrics.risk_level,
            risk_score: metrics.risk_score,
            anomaly_type: metrics.anomaly_type,
            underlying_anomaly: metrics.underlying_anomaly,
            avg_velocity: metrics.avg_velocity,
            high_density_zones: metrics.zones.clone(),
            clusters: metrics.clusters.clone(),
        }
    }
}

/// Aggregate over one pipeline session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub location: String,
    pub camera_id: String,
    pub frames_analyzed: u64,

    /// Sum of `total_count` over all analyzed frames
    pub total_sum: u64,

    /// Frame with the highest `total_count` (first one wins on ties)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak: Option<CrowdReport>,

    pub reconnects: u64,
}

impl SessionSummary {
    pub fn new(location: impl Into<String>, camera_id: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            camera_id: camera_id.into(),
            frames_analyzed: 0,
            total_sum: 0,
            peak: None,
            reconnects: 0,
        }
    }

    /// Fold one report into the summary
    pub fn record(&mut self, report: &CrowdReport) {
        self.frames_analyzed += 1;
        self.total_sum += report.total_count as u64;

        let is_new_peak = self
            .peak
            .as_ref()
            .map_or(true, |peak| report.total_count > peak.total_count);
        if is_new_peak {
            self.peak = Some(report.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_from_bbox() {
        let det = Detection::from_bbox(BoundingBox::new(90.0, 90.0, 110.0, 130.0), 0.8);
        assert_eq!(det.center, Point::new(100.0, 110.0));
        assert_eq!(det.area, 800.0);
    }

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(30.0, 40.0);
        assert!((a.distance(&b) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"CRITICAL\"");
        assert_eq!(
            serde_json::to_string(&AnomalyType::SuddenMovement).unwrap(),
            "\"sudden_movement\""
        );
        assert_eq!(serde_json::to_string(&DensityLevel::High).unwrap(), "\"high\"");
    }

    #[test]
    fn test_summary_tracks_first_peak() {
        let metrics = CrowdMetrics {
            total_count: 4,
            density_score: 1.0,
            risk_level: RiskLevel::Low,
            risk_score: 0.8,
            anomaly_type: AnomalyType::Normal,
            underlying_anomaly: AnomalyType::Normal,
            zones: vec![],
            clusters: vec![],
            avg_velocity: 0.0,
            frame_area: 100,
            timestamp: Utc::now(),
        };

        let mut summary = SessionSummary::new("Gate A", "cam-1");
        summary.record(&CrowdReport::from_metrics(&metrics, 0, "Gate A", "cam-1"));
        summary.record(&CrowdReport::from_metrics(&metrics, 3, "Gate A", "cam-1"));

        assert_eq!(summary.frames_analyzed, 2);
        assert_eq!(summary.total_sum, 8);
        assert_eq!(summary.peak.as_ref().map(|p| p.frame_index), Some(0));
    }
}
