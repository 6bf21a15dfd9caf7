//! Configuration management for telepipe.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable overrides (the standard `OTEL_BSP_*` variables)
//! - Validation and defaults

use crate::core::retry::RetryConfig;
use crate::core::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Queue capacity used when nothing else is configured
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
/// Delay between two timer-driven export cycles
pub const DEFAULT_SCHEDULED_DELAY: Duration = Duration::from_millis(5000);
/// Upper bound on a single export attempt
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_millis(30000);
/// Items per exported batch
pub const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
/// Label sets kept per instrument before folding into the overflow series
pub const DEFAULT_MAX_SERIES_PER_INSTRUMENT: usize = 2000;

/// Complete configuration for a pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Batch processor configuration
    pub batch: BatchConfig,
    /// Export retry configuration
    pub retry: RetryConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Batch processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Ring buffer capacity
    pub max_queue_size: usize,
    /// Interval between timer-driven exports
    #[serde(with = "humantime_serde")]
    pub scheduled_delay: Duration,
    /// Maximum time a single export attempt may take
    #[serde(with = "humantime_serde")]
    pub export_timeout: Duration,
    /// Maximum items handed to the exporter in one call
    pub max_export_batch_size: usize,
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Interval between collections of the aggregation store
    #[serde(with = "humantime_serde")]
    pub collection_interval: Duration,
    /// Cardinality limit per instrument
    pub max_series_per_instrument: usize,
    /// Default temporality for new instruments
    pub temporality: crate::metrics::Temporality,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers in every line
    pub structured: bool,
    /// Number of self-diagnostic entries retained in memory
    pub diagnostics_capacity: usize,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            scheduled_delay: DEFAULT_SCHEDULED_DELAY,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            collection_interval: Duration::from_secs(60),
            max_series_per_instrument: DEFAULT_MAX_SERIES_PER_INSTRUMENT,
            temporality: crate::metrics::Temporality::Cumulative,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
            diagnostics_capacity: 256,
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl BatchConfig {
    /// Reject configurations the processor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(PipelineError::config("max_queue_size must be greater than 0"));
        }

        if self.max_export_batch_size == 0 {
            return Err(PipelineError::config(
                "max_export_batch_size must be greater than 0",
            ));
        }

        if self.max_export_batch_size > self.max_queue_size {
            return Err(PipelineError::config(format!(
                "max_export_batch_size ({}) must not exceed max_queue_size ({})",
                self.max_export_batch_size, self.max_queue_size
            )));
        }

        if self.scheduled_delay.is_zero() {
            return Err(PipelineError::config("scheduled_delay must be greater than 0"));
        }

        if self.export_timeout.is_zero() {
            return Err(PipelineError::config("export_timeout must be greater than 0"));
        }

        Ok(())
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;

        if self.retry.multiplier < 1.0 || !self.retry.multiplier.is_finite() {
            return Err(PipelineError::config(format!(
                "retry multiplier must be a finite number >= 1.0, got {}",
                self.retry.multiplier
            )));
        }

        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(PipelineError::config(
                "retry initial_backoff must not exceed max_backoff",
            ));
        }

        if self.metrics.collection_interval.is_zero() {
            return Err(PipelineError::config(
                "metrics collection_interval must be greater than 0",
            ));
        }

        if self.metrics.max_series_per_instrument == 0 {
            return Err(PipelineError::config(
                "max_series_per_instrument must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Durations are integer milliseconds. Values that fail to parse are
    /// configuration errors.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(size) = parse_var(&lookup, "OTEL_BSP_MAX_QUEUE_SIZE")? {
            self.batch.max_queue_size = size;
        }
        if let Some(ms) = parse_var(&lookup, "OTEL_BSP_SCHEDULE_DELAY")? {
            self.batch.scheduled_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "OTEL_BSP_EXPORT_TIMEOUT")? {
            self.batch.export_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var(&lookup, "OTEL_BSP_MAX_EXPORT_BATCH_SIZE")? {
            self.batch.max_export_batch_size = size;
        }
        if let Some(ms) = parse_var(&lookup, "OTEL_METRIC_EXPORT_INTERVAL")? {
            self.metrics.collection_interval = Duration::from_millis(ms);
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            PipelineError::config(format!("Invalid value for {}: '{}' ({})", key, raw, e))
        }),
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        self.from_yaml(&content)
    }

    /// Apply environment overrides on top of what is loaded so far
    pub fn with_env(mut self) -> Result<Self> {
        self.config.apply_env()?;
        Ok(self)
    }

    /// Set ring buffer capacity
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.batch.max_queue_size = size;
        self
    }

    /// Set max export batch size
    pub fn max_export_batch_size(mut self, size: usize) -> Self {
        self.config.batch.max_export_batch_size = size;
        self
    }

    /// Set the timer-driven export interval
    pub fn scheduled_delay(mut self, delay: Duration) -> Self {
        self.config.batch.scheduled_delay = delay;
        self
    }

    /// Set the per-attempt export timeout
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch.export_timeout = timeout;
        self
    }

    /// Replace the retry configuration
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the metrics collection interval
    pub fn collection_interval(mut self, interval: Duration) -> Self {
        self.config.metrics.collection_interval = interval;
        self
    }

    /// Set the per-instrument cardinality limit
    pub fn max_series_per_instrument(mut self, limit: usize) -> Self {
        self.config.metrics.max_series_per_instrument = limit;
        self
    }

    /// Set log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
