pub mod http;
pub mod replay;

use anyhow::Result;
use async_trait::async_trait;
use common::crowd::{BoundingBox, Detection};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use http::HttpDetector;
pub use replay::ReplayDetector;

/// External person detector consumed by the pipeline
#[async_trait]
pub trait Detector: Send + Sync {
    /// Get the unique detector identifier (e.g., "http_detector")
    fn id(&self) -> &'static str;

    /// Detect people in one frame; `frame_index` is the position of the frame
    /// in its source, counting skipped frames
    async fn detect(&self, frame: &RgbImage, frame_index: u64) -> Result<Vec<Detection>>;

    /// Health check - verify the detector is reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Detection as exchanged with external detectors: corners plus confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// [x1, y1, x2, y2] in frame pixels
    pub bbox: [f64; 4],

    #[serde(default = "default_confidence")]
    pub confidence: f32,

    /// Object class reported by the detector, when it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

fn default_confidence() -> f32 {
    1.0
}

impl RawDetection {
    pub fn into_detection(self) -> Detection {
        let [x1, y1, x2, y2] = self.bbox;
        Detection::from_bbox(
            BoundingBox::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)),
            self.confidence,
        )
    }

    /// Keep detections of the target class above the confidence threshold.
    /// Detections without a class are assumed to be of the target class.
    pub fn accepted(&self, target_class: &str, confidence_threshold: f32) -> bool {
        let class_ok = self
            .class
            .as_deref()
            .map_or(true, |class| class.eq_ignore_ascii_case(target_class));
        class_ok && self.confidence >= confidence_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_detection_normalizes_corners() {
        let raw = RawDetection {
            bbox: [110.0, 130.0, 90.0, 90.0],
            confidence: 0.9,
            class: None,
        };
        let det = raw.into_detection();
        assert_eq!(det.bbox, BoundingBox::new(90.0, 90.0, 110.0, 130.0));
        assert_eq!(det.center.x, 100.0);
        assert_eq!(det.center.y, 110.0);
        assert_eq!(det.area, 800.0);
    }

    #[test]
    fn test_raw_detection_filtering() {
        let person = RawDetection {
            bbox: [0.0, 0.0, 1.0, 1.0],
            confidence: 0.5,
            class: Some("Person".to_string()),
        };
        assert!(person.accepted("person", 0.2));
        assert!(!person.accepted("person", 0.6));

        let car = RawDetection {
            class: Some("car".to_string()),
            ..person.clone()
        };
        assert!(!car.accepted("person", 0.2));

        let unlabeled = RawDetection { class: None, ..person };
        assert!(unlabeled.accepted("person", 0.2));
    }

    #[test]
    fn test_raw_detection_default_confidence() {
        let raw: RawDetection = serde_json::from_str(r#"{"bbox":[1,2,3,4]}"#).unwrap();
        assert_eq!(raw.confidence, 1.0);
        assert_eq!(raw.class, None);
    }
}
