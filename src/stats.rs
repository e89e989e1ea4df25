//! Per-run counters and the end-of-run summary.

use crate::core::{DailyAverageRecord, RejectReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::{Data, Distribution, Max, Min};
use uuid::Uuid;

/// Counters for one run of the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    /// Identifier for this run, included in log output
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Every message taken from the source, including END
    pub messages_received: u64,
    pub malformed: u64,
    pub missing_field: u64,
    pub invalid_numeric: u64,
    pub outliers: u64,
    pub normal_readings: u64,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            messages_received: 0,
            malformed: 0,
            missing_field: 0,
            invalid_numeric: 0,
            outliers: 0,
            normal_readings: 0,
        }
    }

    pub fn record_received(&mut self) {
        self.messages_received += 1;
    }

    pub fn record_rejected(&mut self, reason: &RejectReason) {
        match reason {
            RejectReason::MalformedMessage(_) => self.malformed += 1,
            RejectReason::MissingField(_) => self.missing_field += 1,
            RejectReason::InvalidNumeric { .. } => self.invalid_numeric += 1,
        }
    }

    pub fn record_outlier(&mut self) {
        self.outliers += 1;
    }

    pub fn record_normal(&mut self) {
        self.normal_readings += 1;
    }

    pub fn rejected(&self) -> u64 {
        self.malformed + self.missing_field + self.invalid_numeric
    }

    /// Readings that passed validation, outliers included.
    pub fn valid_readings(&self) -> u64 {
        self.outliers + self.normal_readings
    }

    /// Multi-line summary covering the emitted days and the counters.
    pub fn summary(&self, emitted: &[DailyAverageRecord]) -> String {
        let mut out = String::new();

        if emitted.is_empty() {
            out.push_str("No daily averages computed.\n");
        } else {
            out.push_str("Daily averaged PM2.5 data (sent downstream):\n");
            for record in emitted {
                out.push_str(&format!("  {} -> {:.2}\n", record.day, record.value));
            }
        }

        out.push_str(&format!(
            "Run {} statistics:\n\
             - Messages received: {}\n\
             - Valid readings: {}\n\
             - Non-outlier readings: {}\n\
             - Outliers: {}\n\
             - Rejected: {} (malformed {}, missing field {}, invalid numeric {})\n\
             - Days emitted: {}",
            self.run_id,
            self.messages_received,
            self.valid_readings(),
            self.normal_readings,
            self.outliers,
            self.rejected(),
            self.malformed,
            self.missing_field,
            self.invalid_numeric,
            emitted.len()
        ));

        if let Some(spread) = DailySpread::from_records(emitted) {
            out.push_str(&format!(
                "\nAcross days: mean {:.2}, min {:.2}, max {:.2}",
                spread.mean, spread.min, spread.max
            ));
            if let Some(std_dev) = spread.std_dev {
                out.push_str(&format!(", std dev {std_dev:.2}"));
            }
        }

        out
    }
}

/// Distribution of daily averages across a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailySpread {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation, absent for a single day
    pub std_dev: Option<f64>,
}

impl DailySpread {
    pub fn from_records(records: &[DailyAverageRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let data = Data::new(records.iter().map(|r| r.value).collect::<Vec<f64>>());
        let mean = Distribution::mean(&data)?;
        let std_dev = if records.len() > 1 {
            Distribution::std_dev(&data)
        } else {
            None
        };

        Some(Self {
            mean,
            min: Min::min(&data),
            max: Max::max(&data),
            std_dev,
        })
    }
}
