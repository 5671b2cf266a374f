use lazy_static::lazy_static;
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Frame Pipeline Metrics ====
    pub static ref CROWD_ACTIVE_PIPELINES: IntGauge = {
        let metric = IntGauge::new("crowd_active_pipelines", "Number of running frame pipelines")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_FRAMES_READ: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "crowd_frames_read_total",
                "Total number of frames read from sources",
            ),
            &["source_kind"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_FRAMES_ANALYZED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "crowd_frames_analyzed_total",
                "Total number of sampled frames passed through analysis",
            ),
            &["source_kind", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_ANALYSIS_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "crowd_analysis_latency_seconds",
                "Detection plus analysis time per sampled frame",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["source_kind"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_SOURCE_RECONNECTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "crowd_source_reconnects_total",
                "Total number of live source reconnect attempts",
            ),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_DETECTOR_ERRORS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "crowd_detector_errors_total",
                "Total number of failed detector calls",
            ),
            &["detector"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_OVERLAY_FAILURES: IntCounter = {
        let metric = IntCounter::new(
            "crowd_overlay_failures_total",
            "Total number of overlay renders that failed",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Crowd State Metrics ====
    pub static ref CROWD_PEOPLE_COUNT: IntGaugeVec = {
        let metric = IntGaugeVec::new(
            Opts::new(
                "crowd_people_count",
                "People detected in the latest analyzed frame",
            ),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_RISK_SCORE: GaugeVec = {
        let metric = GaugeVec::new(
            Opts::new(
                "crowd_risk_score",
                "Risk score (0-100) of the latest analyzed frame",
            ),
            &["camera_id"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CROWD_RISK_EVENTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "crowd_risk_events_total",
                "Analyzed frames by risk level and anomaly type",
            ),
            &["risk_level", "anomaly_type"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_accessible() {
        CROWD_ACTIVE_PIPELINES.set(2);
        assert_eq!(CROWD_ACTIVE_PIPELINES.get(), 2);

        CROWD_FRAMES_ANALYZED
            .with_label_values(&["file", "success"])
            .inc();
        assert!(
            CROWD_FRAMES_ANALYZED
                .with_label_values(&["file", "success"])
                .get()
                >= 1
        );
    }

    #[test]
    fn test_crowd_state_metrics_accessible() {
        CROWD_PEOPLE_COUNT.with_label_values(&["cam-test"]).set(42);
        assert_eq!(CROWD_PEOPLE_COUNT.with_label_values(&["cam-test"]).get(), 42);

        CROWD_RISK_SCORE.with_label_values(&["cam-test"]).set(12.5);
        assert_eq!(CROWD_RISK_SCORE.with_label_values(&["cam-test"]).get(), 12.5);
    }

    #[test]
    fn test_encode_metrics() {
        CROWD_OVERLAY_FAILURES.inc();
        let encoded = encode_metrics().unwrap();
        assert!(encoded.contains("crowd_overlay_failures_total"));
    }
}
