//! Exporter writing one line per item to stdout or any other writer.

use crate::core::{Batch, TelemetryItem};
use crate::export::{ExportResult, Exporter};
use crate::metrics::MetricValue;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::{self, Write};
use std::time::Duration;

/// Line format of the console exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Short human-readable summary per line
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" => Ok(OutputFormat::Json),
            "text" | "pretty" => Ok(OutputFormat::Text),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

pub struct ConsoleExporter {
    writer: Box<dyn Write + Send>,
    format: OutputFormat,
}

impl ConsoleExporter {
    /// JSON lines on stdout
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()), OutputFormat::Json)
    }

    pub fn new(writer: Box<dyn Write + Send>, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    fn write_batch(&mut self, batch: &Batch) -> io::Result<()> {
        for item in batch {
            match self.format {
                OutputFormat::Json => {
                    serde_json::to_writer(&mut self.writer, item)?;
                    self.writer.write_all(b"\n")?;
                },
                OutputFormat::Text => writeln!(self.writer, "{}", format_text(item))?,
            }
        }
        self.writer.flush()
    }
}

impl std::fmt::Debug for ConsoleExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleExporter")
            .field("format", &self.format)
            .finish()
    }
}

fn format_timestamp(nanos: u64) -> String {
    let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn format_text(item: &TelemetryItem) -> String {
    let timestamp = format_timestamp(item.timestamp());
    match item {
        TelemetryItem::Span(span) => format!(
            "{} SPAN   {} trace={} span={} duration={:?} status={:?}",
            timestamp, span.name, span.trace_id, span.span_id, span.duration, span.status
        ),
        TelemetryItem::Metric(point) => {
            let value = match &point.value {
                MetricValue::Sum { value, .. } | MetricValue::Gauge { value } => value.to_string(),
                MetricValue::Histogram { count, sum, .. } => format!("count={} sum={}", count, sum),
                MetricValue::ExponentialHistogram {
                    count, sum, scale, ..
                } => format!("count={} sum={} scale={}", count, sum, scale),
            };
            format!(
                "{} METRIC {} {} {:?}",
                timestamp,
                point.name,
                value,
                point.attributes.iter().collect::<Vec<_>>()
            )
        },
        TelemetryItem::Log(log) => format!(
            "{} LOG    {} {}",
            timestamp,
            log.severity.as_str(),
            log.body
        ),
    }
}

#[async_trait::async_trait]
impl Exporter for ConsoleExporter {
    async fn export(&mut self, batch: &Batch) -> ExportResult {
        match self.write_batch(batch) {
            Ok(()) => ExportResult::Success,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                ExportResult::permanent(format!("output closed: {}", e))
            },
            Err(e) => ExportResult::transient(format!("write failed: {}", e)),
        }
    }

    async fn force_flush(&mut self, _timeout: Duration) -> bool {
        self.writer.flush().is_ok()
    }

    async fn shutdown(&mut self, _timeout: Duration) -> bool {
        self.writer.flush().is_ok()
    }

    fn name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogRecord, LogSeverity};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn batch() -> Batch {
        Batch::new(vec![
            LogRecord::new(1_700_000_000_000_000_000, LogSeverity::Error, "boom").into(),
            LogRecord::new(1_700_000_000_000_000_001, LogSeverity::Info, "ok").into(),
        ])
    }

    #[tokio::test]
    async fn test_json_lines() {
        let buf = SharedBuf::default();
        let mut exporter = ConsoleExporter::new(Box::new(buf.clone()), OutputFormat::Json);
        assert!(exporter.export(&batch()).await.is_success());

        let output = String::from_utf8(buf.0.lock().clone()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "log");
        assert_eq!(first["body"], "boom");
    }

    #[tokio::test]
    async fn test_text_format() {
        let buf = SharedBuf::default();
        let mut exporter = ConsoleExporter::new(Box::new(buf.clone()), OutputFormat::Text);
        exporter.export(&batch()).await;

        let output = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert!(output.starts_with("2023-11-14T22:13:20.000000Z LOG    ERROR boom"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
