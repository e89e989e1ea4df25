//! PM2.5 Preprocessor CLI
//!
//! Subscribes to raw readings, emits daily averages downstream.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pm25_preprocessor::{
    config::Config,
    core::Normalizer,
    pipeline::{Pipeline, RunOutcome},
    transport::{JsonlSink, JsonlSource, ReadingSource, RecordSink},
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pm25-preprocessor")]
#[command(version = VERSION)]
#[command(about = "Streaming daily-average preprocessor for PM2.5 readings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume readings until END and publish daily averages
    Run {
        /// Path to a JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where readings come from
        #[arg(long, value_enum, default_value_t = SourceKind::default())]
        source: SourceKind,

        /// Input file when --source=file
        #[arg(long, required_if_eq("source", "file"))]
        input: Option<PathBuf>,

        /// Where daily averages go
        #[arg(long, value_enum, default_value_t = SinkKind::default())]
        sink: SinkKind,

        /// Output file when --sink=file
        #[arg(long, required_if_eq("sink", "file"))]
        output: Option<PathBuf>,
    },

    /// Show the resolved configuration
    Config {
        /// Path to a JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// MQTT topic (requires the mqtt feature)
    Mqtt,
    /// One JSON message per line on stdin
    Stdin,
    /// One JSON message per line from --input
    File,
}

impl Default for SourceKind {
    fn default() -> Self {
        if cfg!(feature = "mqtt") {
            SourceKind::Mqtt
        } else {
            SourceKind::Stdin
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Durable AMQP queue (requires the amqp feature)
    Amqp,
    /// One JSON record per line on stdout
    Stdout,
    /// One JSON record per line appended to --output
    File,
}

impl Default for SinkKind {
    fn default() -> Self {
        if cfg!(feature = "amqp") {
            SinkKind::Amqp
        } else {
            SinkKind::Stdout
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            source,
            input,
            sink,
            output,
        } => cmd_run(config.as_deref(), source, input, sink, output),
        Commands::Config { config } => cmd_config(config.as_deref()),
    };

    if let Err(e) = result {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn cmd_run(
    config_path: Option<&Path>,
    source_kind: SourceKind,
    input: Option<PathBuf>,
    sink_kind: SinkKind,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load(config_path).context("Could not load configuration")?;
    tracing::info!("PM2.5 Preprocessor v{VERSION}");

    // Connect the sink first: a missing downstream queue is fatal before any
    // reading is consumed
    let sink = open_sink(&config, sink_kind, output.as_deref())?;
    let source = open_source(&config, source_kind, input.as_deref())?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting signal handler")?;

    let normalizer = Normalizer::new(config.outlier_threshold);
    let mut pipeline = Pipeline::new(source, sink, normalizer).with_shutdown_flag(running);

    match pipeline.run().context("Pipeline stopped")? {
        RunOutcome::EndOfStream => tracing::info!("Finished after END signal"),
        RunOutcome::SourceClosed => tracing::warn!("Finished without END signal"),
        RunOutcome::Interrupted => tracing::warn!("Interrupted, exiting"),
    }

    Ok(())
}

#[cfg_attr(not(feature = "mqtt"), allow(unused_variables))]
fn open_source(
    config: &Config,
    kind: SourceKind,
    input: Option<&Path>,
) -> Result<Box<dyn ReadingSource>> {
    match kind {
        SourceKind::Stdin => Ok(Box::new(JsonlSource::stdin()?)),
        SourceKind::File => {
            let path = input.context("--input is required with --source=file")?;
            let source = JsonlSource::open(path)
                .with_context(|| format!("Could not open {}", path.display()))?;
            Ok(Box::new(source))
        }
        #[cfg(feature = "mqtt")]
        SourceKind::Mqtt => {
            let source = pm25_preprocessor::transport::MqttSource::connect(&config.inbound)
                .context("Could not connect to MQTT broker")?;
            Ok(Box::new(source))
        }
        #[cfg(not(feature = "mqtt"))]
        SourceKind::Mqtt => {
            anyhow::bail!("MQTT source requested but the mqtt feature is not enabled")
        }
    }
}

#[cfg_attr(not(feature = "amqp"), allow(unused_variables))]
fn open_sink(
    config: &Config,
    kind: SinkKind,
    output: Option<&Path>,
) -> Result<Box<dyn RecordSink>> {
    match kind {
        SinkKind::Stdout => Ok(Box::new(JsonlSink::stdout())),
        SinkKind::File => {
            let path = output.context("--output is required with --sink=file")?;
            Ok(Box::new(JsonlSink::append(path)?))
        }
        #[cfg(feature = "amqp")]
        SinkKind::Amqp => {
            let sink = pm25_preprocessor::transport::AmqpSink::connect(&config.outbound)
                .context("Could not connect to AMQP broker")?;
            Ok(Box::new(sink))
        }
        #[cfg(not(feature = "amqp"))]
        SinkKind::Amqp => anyhow::bail!("AMQP sink requested but the amqp feature is not enabled"),
    }
}

fn cmd_config(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).context("Could not load configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    match config_path {
        Some(path) => println!("Config file: {path:?}"),
        None => println!("Config file: {:?}", Config::config_path()),
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}
