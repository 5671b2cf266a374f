//! Detector backed by an external HTTP inference endpoint
//!
//! Each frame is JPEG-encoded, base64-wrapped and POSTed together with the
//! detection thresholds; the endpoint answers with a list of boxes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use common::crowd::Detection;
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Detector, RawDetection};
use crate::config::DetectorConfig;

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    frame_data: String,
    frame_index: u64,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    classes: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

pub struct HttpDetector {
    client: Client,
    endpoint: Url,
    confidence_threshold: f32,
    iou_threshold: f32,
    target_class: String,
}

impl HttpDetector {
    pub fn new(endpoint: Url, config: &DetectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build detector HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            target_class: config.target_class.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Encode a frame as base64 JPEG for JSON transport
pub fn encode_frame(frame: &RgbImage) -> Result<String> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(frame)
        .context("failed to encode frame as JPEG")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&jpeg))
}

#[async_trait]
impl Detector for HttpDetector {
    fn id(&self) -> &'static str {
        "http_detector"
    }

    async fn detect(&self, frame: &RgbImage, frame_index: u64) -> Result<Vec<Detection>> {
        let payload = DetectRequest {
            frame_data: encode_frame(frame)?,
            frame_index,
            width: frame.width(),
            height: frame.height(),
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            classes: [self.target_class.as_str()],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await
            .context("failed to send frame to detector")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("detector returned error {}: {}", status, body);
        }

        let body: DetectResponse = response
            .json()
            .await
            .context("failed to decode detector response")?;

        let detections: Vec<Detection> = body
            .detections
            .into_iter()
            .filter(|raw| raw.accepted(&self.target_class, self.confidence_threshold))
            .map(RawDetection::into_detection)
            .collect();

        debug!(
            frame_index,
            detections = detections.len(),
            "detector returned detections"
        );

        Ok(detections)
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self.client.head(self.endpoint.clone()).send().await;
        Ok(response.map(|r| !r.status().is_server_error()).unwrap_or(false))
    }
}
