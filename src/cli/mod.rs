//! Command-line interface for Telepipe.
//!
//! `telepipe run` pushes synthetic spans, logs and metrics through a pipeline
//! and prints the final counters; `telepipe config` validates or prints the
//! effective configuration.

use crate::bridge::PipelineLayer;
use crate::core::config::ConfigBuilder;
use crate::core::logging;
use crate::core::{Attributes, Config, LogLevel, PipelineError, Result, SpanKind, SpanRecord, SpanStatus};
use crate::export::{ConsoleExporter, Exporter, InMemoryExporter, OutputFormat};
use crate::logs::{LogRecord, LogSeverity};
use crate::pipeline::Pipeline;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Bounded telemetry pipeline with batch export
#[derive(Parser, Debug)]
#[command(name = "telepipe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, global = true, env = "TELEPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, env = "TELEPIPE_DEBUG")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive synthetic load through a pipeline and print its counters
    Run(RunArgs),
    /// Validate or print the effective configuration
    Config(ConfigArgs),
}

/// Where exported items go
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    /// One line per item on stdout
    Console,
    /// Keep items in memory and only report counts
    Memory,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Concurrent producer threads
    #[arg(long, default_value_t = 4)]
    pub producers: usize,

    /// Items submitted by each producer
    #[arg(long, default_value_t = 1000)]
    pub items: usize,

    /// Exporter receiving the batches
    #[arg(long, value_enum, default_value_t = ExporterKind::Memory)]
    pub exporter: ExporterKind,

    /// Console exporter format (json or text)
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,

    /// Ring buffer capacity
    #[arg(long, env = "TELEPIPE_QUEUE_SIZE")]
    pub queue_size: Option<usize>,

    /// Maximum items per exported batch
    #[arg(long, env = "TELEPIPE_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Also forward the pipeline's own log events into the pipeline
    #[arg(long)]
    pub capture_logs: bool,

    /// Shutdown timeout, e.g. "5s"
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub shutdown_timeout: Duration,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Validate and exit
    #[arg(long)]
    pub check: bool,

    /// Print the effective configuration as YAML
    #[arg(long)]
    pub print: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        if let Some(path) = &self.config {
            builder = builder.from_file(path)?;
            tracing::debug!("Loaded configuration from: {:?}", path);
        }

        builder = builder.with_env()?;

        if let Command::Run(args) = &self.command {
            if let Some(size) = args.queue_size {
                builder = builder.max_queue_size(size);
            }
            if let Some(size) = args.batch_size {
                builder = builder.max_export_batch_size(size);
            }
        }
        if self.debug {
            builder = builder.log_level(LogLevel::Debug);
        }

        builder.build()
    }
}

/// Execute the parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;

    match &cli.command {
        Command::Config(args) => {
            logging::init(&config.logging)?;
            show_config(&config, args)
        },
        Command::Run(args) => run(config, args).await,
    }
}

fn show_config(config: &Config, args: &ConfigArgs) -> Result<()> {
    if args.print || !args.check {
        print!("{}", serde_yaml::to_string(config)?);
    }
    if args.check {
        println!("Configuration is valid!");
        println!("  Queue size: {}", config.batch.max_queue_size);
        println!("  Batch size: {}", config.batch.max_export_batch_size);
        println!("  Scheduled delay: {:?}", config.batch.scheduled_delay);
        println!("  Export timeout: {:?}", config.batch.export_timeout);
        println!("  Retry budget: {}", config.retry.max_retries);
    }
    Ok(())
}

async fn run(config: Config, args: &RunArgs) -> Result<()> {
    let memory = InMemoryExporter::new();
    let exporter: Box<dyn Exporter> = match args.exporter {
        ExporterKind::Console => Box::new(ConsoleExporter::new(Box::new(std::io::stdout()), args.format)),
        ExporterKind::Memory => Box::new(memory.clone()),
    };

    let pipeline = Arc::new(Pipeline::new(exporter, config)?);

    let bridge = args
        .capture_logs
        .then(|| PipelineLayer::new(pipeline.processor()));
    logging::init_with(&pipeline.config().logging, bridge)?;

    tracing::info!(
        producers = args.producers,
        items = args.items,
        exporter = ?args.exporter,
        "starting synthetic load"
    );

    let producers: Vec<_> = (0..args.producers)
        .map(|producer| {
            let pipeline = Arc::clone(&pipeline);
            let items = args.items;
            std::thread::spawn(move || produce(&pipeline, producer, items))
        })
        .collect();

    for handle in producers {
        handle
            .join()
            .map_err(|_| PipelineError::Runtime("producer thread panicked".to_string()))??;
    }

    let clean = pipeline.shutdown(args.shutdown_timeout).await;
    if !clean {
        tracing::warn!("shutdown did not complete within {:?}", args.shutdown_timeout);
    }

    let stats = pipeline.stats();
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    if args.exporter == ExporterKind::Memory {
        eprintln!("exported {} items in {} batches", memory.item_count(), memory.batch_count());
    }
    if pipeline.diagnostics().total() > 0 {
        eprintln!("{}", pipeline.diagnostics().summary());
    }
    Ok(())
}

/// One producer: every iteration emits a span, a log record and two measurements
fn produce(pipeline: &Pipeline, producer: usize, items: usize) -> Result<()> {
    let meter = pipeline.meter();
    let requests = meter.counter("http.server.requests")?;
    let latency = meter.histogram("http.server.duration")?;
    let attributes = Attributes::new().with("producer", producer.to_string());

    for n in 0..items {
        let millis = (n % 250) as u64;
        let status = if n % 97 == 0 {
            SpanStatus::Error("synthetic failure".to_string())
        } else {
            SpanStatus::Ok
        };
        let span = SpanRecord::builder()
            .name("GET /synthetic")
            .kind(SpanKind::Server)
            .duration(Duration::from_millis(millis))
            .status(status)
            .attribute("producer", producer.to_string())
            .build()?;

        let severity = if span.status.is_error() {
            LogSeverity::Error
        } else {
            LogSeverity::Info
        };
        let log = LogRecord::new(span.start_time, severity, format!("request {} handled", n))
            .with_trace_id(span.trace_id)
            .with_span_id(span.span_id);

        pipeline.submit(span);
        pipeline.submit(log);
        requests.add(1.0, &attributes);
        latency.record(millis as f64, &attributes);
    }
    Ok(())
}
