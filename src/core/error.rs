use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline closed: {0}")]
    Closed(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("No tokio runtime available: {0}")]
    Runtime(String),

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Buffer full: cannot store more items")]
    BufferFull,
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new closed-pipeline error
    pub fn closed<S: Into<String>>(msg: S) -> Self {
        Self::Closed(msg.into())
    }

    /// Creates a new export error
    pub fn export<S: Into<String>>(msg: S) -> Self {
        Self::Export(msg.into())
    }

    /// Creates a new invalid measurement error
    pub fn invalid_measurement<S: Into<String>>(msg: S) -> Self {
        Self::InvalidMeasurement(msg.into())
    }

    /// Creates a new invalid identifier error
    pub fn invalid_id<S: Into<String>>(msg: S) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Export(_) | Self::Timeout { .. } | Self::BufferFull)
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Yaml(_) => "config",
            Self::Closed(_) => "lifecycle",
            Self::Export(_) => "export",
            Self::InvalidMeasurement(_) | Self::InvalidId(_) => "validation",
            Self::Runtime(_) => "runtime",
            Self::Timeout { .. } => "timeout",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::BufferFull => "buffer",
        }
    }
}
