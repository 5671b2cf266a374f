//! Detector replaying precomputed detections
//!
//! Detections are keyed by source frame index. The JSON-lines format holds one
//! `{"frame_index": N, "detections": [...]}` object per line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::crowd::Detection;
use image::RgbImage;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::{Detector, RawDetection};
use crate::config::DetectorConfig;

#[derive(Debug, Deserialize)]
struct ReplayLine {
    frame_index: u64,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
    /// Returned for frames without an entry
    fallback: Vec<Detection>,
}

impl ReplayDetector {
    pub fn new(frames: HashMap<u64, Vec<Detection>>) -> Self {
        Self {
            frames,
            fallback: Vec::new(),
        }
    }

    /// Same detections for every frame
    pub fn constant(detections: Vec<Detection>) -> Self {
        Self {
            frames: HashMap::new(),
            fallback: detections,
        }
    }

    pub fn insert(&mut self, frame_index: u64, detections: Vec<Detection>) {
        self.frames.insert(frame_index, detections);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Parse JSON-lines content, applying the class and confidence filters
    pub fn from_jsonl(content: &str, config: &DetectorConfig) -> Result<Self> {
        let mut frames = HashMap::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let entry: ReplayLine = serde_json::from_str(line)
                .with_context(|| format!("invalid detections on line {}", line_no + 1))?;

            let detections = entry
                .detections
                .into_iter()
                .filter(|raw| raw.accepted(&config.target_class, config.confidence_threshold))
                .map(RawDetection::into_detection)
                .collect();
            frames.insert(entry.frame_index, detections);
        }

        Ok(Self::new(frames))
    }

    pub async fn from_jsonl_file(path: impl AsRef<Path>, config: &DetectorConfig) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read detections file {}", path.display()))?;

        let detector = Self::from_jsonl(&content, config)?;
        info!(
            path = %path.display(),
            frames = detector.len(),
            "loaded precomputed detections"
        );
        Ok(detector)
    }
}

#[async_trait]
impl Detector for ReplayDetector {
    fn id(&self) -> &'static str {
        "replay_detector"
    }

    async fn detect(&self, _frame: &RgbImage, frame_index: u64) -> Result<Vec<Detection>> {
        Ok(self
            .frames
            .get(&frame_index)
            .unwrap_or(&self.fallback)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
{"frame_index": 0, "detections": [{"bbox": [90, 90, 110, 110], "confidence": 0.9, "class": "person"}]}
{"frame_index": 3, "detections": [{"bbox": [0, 0, 10, 10], "confidence": 0.1}, {"bbox": [0, 0, 10, 10], "confidence": 0.8, "class": "dog"}]}
"#;

    #[tokio::test]
    async fn test_lookup_by_frame_index() {
        let detector = ReplayDetector::from_jsonl(SAMPLE, &DetectorConfig::default()).unwrap();
        let frame = RgbImage::new(1, 1);

        let first = detector.detect(&frame, 0).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].center.x, 100.0);

        // low confidence and non-person boxes are filtered out
        assert!(detector.detect(&frame, 3).await.unwrap().is_empty());
        // frames without entries see no people
        assert!(detector.detect(&frame, 7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_constant_detector() {
        let mut detector = ReplayDetector::constant(vec![Detection::at(5.0, 5.0)]);
        detector.insert(3, Vec::new());
        let frame = RgbImage::new(1, 1);
        assert_eq!(detector.detect(&frame, 42).await.unwrap().len(), 1);
        assert!(detector.detect(&frame, 3).await.unwrap().is_empty());
    }

    #[test]
    fn test_invalid_line_reports_position() {
        let content = "{\"frame_index\": 0}\nnot json";
        let err = ReplayDetector::from_jsonl(content, &DetectorConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let detector = ReplayDetector::from_jsonl_file(file.path(), &DetectorConfig::default())
            .await
            .unwrap();
        assert_eq!(detector.len(), 2);

        let missing = "/nonexistent/detections.jsonl";
        assert!(ReplayDetector::from_jsonl_file(missing, &DetectorConfig::default())
            .await
            .is_err());
    }
}
