use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// Compact text format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl LogFormat {
    /// Parse log format from the `LOG_FORMAT` environment variable
    pub fn from_env() -> Self {
        Self::parse(&env::var("LOG_FORMAT").unwrap_or_default())
    }

    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Configuration for structured logging
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log output format (pretty/compact/json)
    pub format: LogFormat,
    /// Service name (e.g., "crowd-analytics")
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Camera or site tag attached to the startup record
    pub camera_id: Option<String>,
    /// Enable span events (new/close)
    pub enable_span_events: bool,
    /// Directory for a daily rolling JSON log file, in addition to stdout
    pub log_dir: Option<String>,
}

impl LogConfig {
    /// Create a new log configuration from the environment
    pub fn new(service_name: impl Into<String>) -> Self {
        let log_to_file = env::var("LOG_TO_FILE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            format: LogFormat::from_env(),
            service_name: service_name.into(),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            camera_id: env::var("CAMERA_ID").ok(),
            enable_span_events: env::var("LOG_SPAN_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: if log_to_file {
                env::var("LOG_DIR").ok()
            } else {
                None
            },
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_camera_id(mut self, camera_id: impl Into<String>) -> Self {
        self.camera_id = Some(camera_id.into());
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.enable_span_events = enable;
        self
    }

    /// Also write JSON logs to a daily rolling file in `log_dir`
    pub fn with_file_logging(mut self, log_dir: impl Into<String>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.enable_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Initialize structured logging with the given configuration.
///
/// The returned guard flushes the file writer when dropped; hold it for the
/// lifetime of the process when file logging is enabled.
pub fn init_structured_logging(config: LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("hyper=warn".parse().expect("valid directive"))
        .add_directive("reqwest=warn".parse().expect("valid directive"))
        .add_directive("tokio=warn".parse().expect("valid directive"));

    let stdout_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(config.span_events())
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(config.span_events())
            .with_target(true)
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(config.span_events())
            .with_target(true)
            .with_line_number(true)
            .with_writer(io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(log_dir) => {
            let file_appender =
                tracing_appender::rolling::daily(log_dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_span_events(config.span_events())
                .with_writer(non_blocking)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        service.name = %config.service_name,
        service.version = %config.service_version,
        camera_id = ?config.camera_id,
        format = ?config.format,
        file_logging = config.log_dir.is_some(),
        "structured logging initialized"
    );

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Pretty);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("crowd-analytics")
            .with_version("1.0.0")
            .with_camera_id("gate-a")
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_file_logging("/tmp/crowd-logs");

        assert_eq!(config.service_name, "crowd-analytics");
        assert_eq!(config.service_version, "1.0.0");
        assert_eq!(config.camera_id, Some("gate-a".to_string()));
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir.as_deref(), Some("/tmp/crowd-logs"));
        assert_eq!(config.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
    }
}
