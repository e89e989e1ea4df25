//! Core functionality for the PM2.5 preprocessor.
//!
//! This module contains:
//! - Reading and daily-average types
//! - The normalizer that validates and classifies inbound messages
//! - The daily aggregation engine

pub mod engine;
pub mod normalizer;
pub mod reading;

// Re-export commonly used types
pub use engine::{Bucket, DailyAggregator, EngineState};
pub use normalizer::{
    resolve_epoch_seconds, utc_day, Normalized, Normalizer, RejectReason,
    DEFAULT_OUTLIER_THRESHOLD, END_MARKER, MILLIS_THRESHOLD,
};
pub use reading::{Classification, DailyAverageMessage, DailyAverageRecord, NormalizedReading};
