//! Reading and daily-average types.
//!
//! Inbound readings only live as in-flight messages; the types here are
//! what remains after normalization, plus the finalized per-day record.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A reading whose timestamp unit has been resolved and whose value is finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedReading {
    /// UTC calendar day of the resolved timestamp
    pub day: NaiveDate,
    /// Measured value
    pub value: f64,
}

impl NormalizedReading {
    /// Create a reading for a day.
    pub fn new(day: NaiveDate, value: f64) -> Self {
        Self { day, value }
    }
}

/// Outcome of the threshold check on a normalized reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Value at or below the threshold, aggregated
    Normal,
    /// Value above the threshold, excluded from aggregation
    Outlier,
}

/// Finalized mean for one calendar day. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyAverageRecord {
    pub day: NaiveDate,
    pub value: f64,
}

impl DailyAverageRecord {
    /// Seconds since the epoch at UTC midnight of `day`.
    pub fn day_start_timestamp(&self) -> i64 {
        self.day.and_time(NaiveTime::MIN).and_utc().timestamp()
    }

    /// Convert to the outbound wire form.
    pub fn to_message(&self) -> DailyAverageMessage {
        DailyAverageMessage {
            timestamp: self.day_start_timestamp(),
            value: self.value,
        }
    }
}

/// Wire form of a [`DailyAverageRecord`] as delivered to the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyAverageMessage {
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
    #[serde(rename = "Value")]
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_start_timestamp() {
        let record = DailyAverageRecord {
            day: NaiveDate::from_ymd_opt(2023, 11, 14).unwrap(),
            value: 15.0,
        };
        // 2023-11-14T00:00:00Z
        assert_eq!(record.day_start_timestamp(), 1_699_920_000);
    }

    #[test]
    fn test_message_field_names() {
        let record = DailyAverageRecord {
            day: NaiveDate::from_ymd_opt(1970, 1, 2).unwrap(),
            value: 12.5,
        };
        let json = serde_json::to_value(record.to_message()).unwrap();

        assert_eq!(json["Timestamp"], 86_400);
        assert_eq!(json["Value"], 12.5);
        assert_eq!(json.as_object().unwrap().len(), 2);
    }
}
