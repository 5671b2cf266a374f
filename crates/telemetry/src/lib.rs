pub mod logging;
pub mod metrics;

pub use logging::{init_structured_logging, LogConfig, LogFormat};
