//! PM2.5 Preprocessor - streaming daily averages for sensor readings.
//!
//! This library consumes a stream of timestamped PM2.5 readings, drops
//! malformed messages and outliers, and computes one mean per UTC calendar
//! day. Each finished day is forwarded to a downstream queue as soon as a
//! reading for another day shows it is complete.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PM2.5 Preprocessor                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Source    │──▶│ Normalizer  │──▶│   Daily     │         │
//! │  │ (MQTT/JSONL)│   │ (outliers)  │   │ Aggregator  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                             │                │
//! │                                             ▼                │
//! │                    ┌─────────────┐   ┌─────────────┐         │
//! │                    │  Run Stats  │   │    Sink     │         │
//! │                    │  (summary)  │   │(AMQP/JSONL) │         │
//! │                    └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pm25_preprocessor::{core::Normalizer, pipeline::Pipeline, transport};
//!
//! let (sender, source) = transport::channel_source(16);
//! sender.send(br#"{"Timestamp": 1700000000, "Value": 10}"#.to_vec()).unwrap();
//! sender.send(br#"{"Type": "END"}"#.to_vec()).unwrap();
//!
//! let mut pipeline = Pipeline::new(source, transport::MemorySink::new(), Normalizer::default());
//! pipeline.run().expect("pipeline failed");
//! assert_eq!(pipeline.sink().records().len(), 1);
//! ```

pub mod config;
pub mod core;
pub mod pipeline;
pub mod stats;
pub mod transport;

// Re-export key types at crate root for convenience
pub use crate::config::{Config, ConfigError, InboundConfig, OutboundConfig};
pub use crate::core::{
    Classification, DailyAggregator, DailyAverageRecord, Normalized, NormalizedReading,
    Normalizer, RejectReason,
};
pub use pipeline::{Pipeline, PipelineError, RunOutcome, Step};
pub use stats::RunStats;
pub use transport::{ReadingSource, RecordSink, SinkError, SourceError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
