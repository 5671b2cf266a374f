use anyhow::{bail, Context, Result};
use crowd_analytics::{
    AnalyticsConfig, Detector, DetectorConfig, FfmpegSource, FramePipeline, HttpDetector,
    JsonLinesSink, PipelineConfig, ReplayDetector, ReportSink,
};
use telemetry::LogConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize telemetry; the guard keeps the file writer alive
    let _log_guard = telemetry::init_structured_logging(LogConfig::new("crowd-analytics"));

    // Load configuration from environment
    let analytics = AnalyticsConfig::from_env()?;
    let detector_config = DetectorConfig::from_env()?;
    let pipeline_config = PipelineConfig::from_env()?;

    info!(
        source = %pipeline_config.source_uri,
        kind = pipeline_config.source_kind.as_str(),
        location = %pipeline_config.location,
        "Starting crowd analytics..."
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let source = FfmpegSource::open(&pipeline_config.source_uri, pipeline_config.source_kind)
        .await
        .context("failed to open video source")?;

    let result = if let Some(endpoint) = detector_config.endpoint.clone() {
        info!(endpoint = %endpoint, "Using HTTP detector");
        let detector = HttpDetector::new(endpoint, &detector_config)?;
        if !detector.health_check().await.unwrap_or(false) {
            warn!("detector endpoint did not answer the health check");
        }
        run(source, detector, analytics, pipeline_config.clone(), cancel).await
    } else if let Some(path) = &detector_config.detections_file {
        info!(path = %path.display(), "Using precomputed detections");
        let detector = ReplayDetector::from_jsonl_file(path, &detector_config).await?;
        run(source, detector, analytics, pipeline_config.clone(), cancel).await
    } else {
        bail!("no detector configured: set DETECTOR_URL or DETECTIONS_FILE");
    };

    if let Some(path) = &pipeline_config.metrics_path {
        match telemetry::metrics::encode_metrics() {
            Ok(text) => {
                if let Err(e) = tokio::fs::write(path, text).await {
                    error!(path = %path.display(), error = %e, "failed to write metrics");
                }
            }
            Err(e) => error!(error = %e, "failed to encode metrics"),
        }
    }

    result
}

async fn run<D: Detector>(
    source: FfmpegSource,
    detector: D,
    analytics: AnalyticsConfig,
    config: PipelineConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut sink: Box<dyn ReportSink> = match &config.report_path {
        Some(path) => Box::new(JsonLinesSink::append(path).await?),
        None => Box::new(JsonLinesSink::stdout()),
    };

    let mut pipeline = FramePipeline::new(source, detector, analytics, config, cancel)?;
    let summary = pipeline.run(sink.as_mut()).await?;

    info!(
        frames_analyzed = summary.frames_analyzed,
        total_sum = summary.total_sum,
        reconnects = summary.reconnects,
        "Crowd analytics stopped"
    );
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    cancel.cancel();
}
