use thiserror::Error;

/// Failures reported by frame sources
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened at all; not retried
    #[error("source unavailable: {uri}: {reason}")]
    Unavailable { uri: String, reason: String },

    /// A read failed mid-stream; live sources treat this as transient
    #[error("failed to read frame from {uri}: {reason}")]
    ReadFailed { uri: String, reason: String },

    /// The decoder produced a frame that does not match the bound dimensions
    #[error("malformed frame from {uri}: {reason}")]
    MalformedFrame { uri: String, reason: String },
}

impl SourceError {
    pub fn unavailable(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn read_failed(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::ReadFailed {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedFrame {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            SourceError::Unavailable { uri, .. }
            | SourceError::ReadFailed { uri, .. }
            | SourceError::MalformedFrame { uri, .. } => uri,
        }
    }
}
