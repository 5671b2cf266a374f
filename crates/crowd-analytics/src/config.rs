use anyhow::{ensure, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::source::SourceKind;

/// Thresholds and constants used by the analytics engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Grid cell edge in pixels for zone detection
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,

    /// People per grid cell that flags a zone
    #[serde(default = "default_high_density_threshold")]
    pub high_density_threshold: u32,

    /// Average velocity (pixels/second) considered anomalous
    #[serde(default = "default_anomaly_movement_threshold")]
    pub anomaly_movement_threshold: f64,

    /// DBSCAN neighbour radius in pixels
    #[serde(default = "default_clustering_eps")]
    pub clustering_eps: f64,

    /// DBSCAN minimum neighbourhood size (the point itself included)
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Assumed pixels per square meter of ground
    #[serde(default = "default_pixels_per_sqm")]
    pub pixels_per_sqm: f64,

    /// Nearest-neighbour matches at or beyond this distance are not motion
    #[serde(default = "default_max_match_distance")]
    pub max_match_distance: f64,

    /// Seconds between analyzed frames when the caller does not say
    #[serde(default = "default_time_delta")]
    pub default_time_delta: f64,
}

fn default_grid_size() -> u32 {
    50
}

fn default_high_density_threshold() -> u32 {
    5
}

fn default_anomaly_movement_threshold() -> f64 {
    50.0
}

fn default_clustering_eps() -> f64 {
    100.0
}

fn default_min_cluster_size() -> usize {
    10
}

fn default_pixels_per_sqm() -> f64 {
    10_000.0
}

fn default_max_match_distance() -> f64 {
    200.0
}

fn default_time_delta() -> f64 {
    0.33
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            high_density_threshold: default_high_density_threshold(),
            anomaly_movement_threshold: default_anomaly_movement_threshold(),
            clustering_eps: default_clustering_eps(),
            min_cluster_size: default_min_cluster_size(),
            pixels_per_sqm: default_pixels_per_sqm(),
            max_match_distance: default_max_match_distance(),
            default_time_delta: default_time_delta(),
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            grid_size: env_or("DENSITY_GRID_SIZE", defaults.grid_size)?,
            high_density_threshold: env_or(
                "HIGH_DENSITY_THRESHOLD",
                defaults.high_density_threshold,
            )?,
            anomaly_movement_threshold: env_or(
                "ANOMALY_MOVEMENT_THRESHOLD",
                defaults.anomaly_movement_threshold,
            )?,
            clustering_eps: env_or("CLUSTERING_EPS", defaults.clustering_eps)?,
            min_cluster_size: env_or("MIN_CLUSTER_SIZE", defaults.min_cluster_size)?,
            pixels_per_sqm: env_or("PIXELS_PER_SQM", defaults.pixels_per_sqm)?,
            max_match_distance: env_or("MAX_MATCH_DISTANCE", defaults.max_match_distance)?,
            default_time_delta: env_or("DEFAULT_TIME_DELTA", defaults.default_time_delta)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.grid_size > 0, "grid_size must be greater than zero");
        ensure!(
            self.high_density_threshold > 0,
            "high_density_threshold must be greater than zero"
        );
        ensure!(
            self.anomaly_movement_threshold > 0.0,
            "anomaly_movement_threshold must be positive"
        );
        ensure!(self.clustering_eps >= 0.0, "clustering_eps must not be negative");
        ensure!(
            self.min_cluster_size > 0,
            "min_cluster_size must be greater than zero"
        );
        ensure!(self.pixels_per_sqm > 0.0, "pixels_per_sqm must be positive");
        ensure!(
            self.max_match_distance > 0.0,
            "max_match_distance must be positive"
        );
        ensure!(
            self.default_time_delta > 0.0,
            "default_time_delta must be positive"
        );
        Ok(())
    }
}

/// Settings for the external detector collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Inference endpoint accepting JPEG frames
    pub endpoint: Option<Url>,

    /// JSON-lines file of precomputed detections, used when no endpoint is set
    pub detections_file: Option<PathBuf>,

    pub confidence_threshold: f32,
    pub iou_threshold: f32,

    /// The single object class the detector is asked for
    pub target_class: String,

    pub timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            detections_file: None,
            confidence_threshold: 0.2,
            iou_threshold: 0.3,
            target_class: "person".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DetectorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let endpoint = env::var("DETECTOR_URL")
            .ok()
            .map(|s| Url::parse(&s).context("Invalid DETECTOR_URL"))
            .transpose()?;

        let config = Self {
            endpoint,
            detections_file: env::var("DETECTIONS_FILE").ok().map(PathBuf::from),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", defaults.confidence_threshold)?,
            iou_threshold: env_or("IOU_THRESHOLD", defaults.iou_threshold)?,
            target_class: env::var("DETECTOR_CLASS").unwrap_or(defaults.target_class),
            timeout: Duration::from_secs(env_or(
                "DETECTOR_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
        };

        ensure!(
            (0.0..=1.0).contains(&config.confidence_threshold),
            "CONFIDENCE_THRESHOLD must be within 0.0..=1.0"
        );
        ensure!(
            (0.0..=1.0).contains(&config.iou_threshold),
            "IOU_THRESHOLD must be within 0.0..=1.0"
        );

        Ok(config)
    }
}

/// Settings for one frame pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub source_uri: String,
    pub source_kind: SourceKind,

    /// Analyze every Nth frame
    pub frame_sample_rate: u32,

    /// Wait between a failed live read and the reconnect attempt
    pub reconnect_backoff: Duration,

    /// Stop after this many analyzed frames
    pub max_frames: Option<u64>,

    pub render_overlay: bool,

    /// Location tag attached to every report
    pub location: String,

    pub camera_id: String,

    /// Annotated frames are written here as JPEG files when set
    pub annotated_output_dir: Option<PathBuf>,

    /// Reports go to this JSON-lines file, or stdout when unset
    pub report_path: Option<PathBuf>,

    /// Prometheus text snapshot written on exit when set
    pub metrics_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(source_uri: impl Into<String>) -> Self {
        let source_uri = source_uri.into();
        Self {
            source_kind: SourceKind::from_uri(&source_uri),
            source_uri,
            frame_sample_rate: 3,
            reconnect_backoff: Duration::from_secs(5),
            max_frames: None,
            render_overlay: true,
            location: String::new(),
            camera_id: default_camera_id(),
            annotated_output_dir: None,
            report_path: None,
            metrics_path: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let source_uri = env::var("CROWD_SOURCE_URI").context("CROWD_SOURCE_URI is not set")?;
        let mut config = Self::new(source_uri);

        if let Ok(kind) = env::var("CROWD_SOURCE_KIND") {
            config.source_kind = kind.parse()?;
        }
        config.frame_sample_rate = env_or("FRAME_SAMPLE_RATE", config.frame_sample_rate)?;
        config.reconnect_backoff = Duration::from_secs(env_or(
            "RECONNECT_BACKOFF_SECS",
            config.reconnect_backoff.as_secs(),
        )?);
        config.max_frames = env::var("MAX_FRAMES")
            .ok()
            .map(|v| v.parse().context("Invalid MAX_FRAMES"))
            .transpose()?;
        config.render_overlay = env_or("RENDER_OVERLAY", config.render_overlay)?;
        config.location = env::var("CROWD_LOCATION").unwrap_or_default();
        if let Ok(camera_id) = env::var("CAMERA_ID") {
            config.camera_id = camera_id;
        }
        config.annotated_output_dir = env::var("ANNOTATED_OUTPUT_DIR").ok().map(PathBuf::from);
        config.report_path = env::var("CROWD_REPORT_PATH").ok().map(PathBuf::from);
        config.metrics_path = env::var("CROWD_METRICS_PATH").ok().map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.source_uri.is_empty(), "source URI must not be empty");
        ensure!(
            self.frame_sample_rate > 0,
            "frame_sample_rate must be greater than zero"
        );
        Ok(())
    }
}

fn default_camera_id() -> String {
    format!(
        "crowd-{}",
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    )
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_defaults() {
        let config = AnalyticsConfig::default();
        assert_eq!(config.grid_size, 50);
        assert_eq!(config.high_density_threshold, 5);
        assert_eq!(config.anomaly_movement_threshold, 50.0);
        assert_eq!(config.clustering_eps, 100.0);
        assert_eq!(config.min_cluster_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_analytics_config_partial_json() {
        let config: AnalyticsConfig =
            serde_json::from_value(serde_json::json!({ "grid_size": 20 })).unwrap();
        assert_eq!(config.grid_size, 20);
        assert_eq!(config.min_cluster_size, 10);
    }

    #[test]
    fn test_analytics_config_rejects_zero_grid() {
        let config = AnalyticsConfig {
            grid_size: 0,
            ..AnalyticsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::new("rtsp://camera.local/stream");
        assert_eq!(config.source_kind, SourceKind::Live);
        assert_eq!(config.frame_sample_rate, 3);
        assert_eq!(config.reconnect_backoff, Duration::from_secs(5));
        assert!(config.camera_id.starts_with("crowd-"));

        let file = PipelineConfig::new("/videos/crowd.mp4");
        assert_eq!(file.source_kind, SourceKind::File);
    }

    #[test]
    fn test_pipeline_rejects_zero_sample_rate() {
        let mut config = PipelineConfig::new("crowd.mp4");
        config.frame_sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.confidence_threshold, 0.2);
        assert_eq!(config.iou_threshold, 0.3);
        assert_eq!(config.target_class, "person");
    }
}
