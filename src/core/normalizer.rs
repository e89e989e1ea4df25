//! Validation and canonicalization of inbound messages.
//!
//! Each message body is decoded as a JSON object and turned into either a
//! [`NormalizedReading`] with its [`Classification`], the end-of-stream
//! control signal, or a [`RejectReason`]. Nothing here touches aggregation
//! state.

use crate::core::reading::{Classification, NormalizedReading};
use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

/// Timestamps above this are taken to be milliseconds since the epoch.
///
/// This is a heuristic: the wire format carries no unit field, so a value
/// near the threshold is ambiguous.
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Readings with a value strictly above this are outliers.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 50.0;

/// Value of the `Type` field that marks the end of the stream.
pub const END_MARKER: &str = "END";

const TIMESTAMP_FIELD: &str = "Timestamp";
const VALUE_FIELD: &str = "Value";
const TYPE_FIELD: &str = "Type";

/// Result of normalizing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Reading(NormalizedReading, Classification),
    EndOfStream,
}

/// Why a message was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Body is not a UTF-8 JSON object
    MalformedMessage(String),
    /// A required field is absent or null
    MissingField(&'static str),
    /// A field is present but not a usable number
    InvalidNumeric { field: &'static str, raw: String },
}

impl RejectReason {
    /// Short label used for counting rejects by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::MalformedMessage(_) => "malformed",
            RejectReason::MissingField(_) => "missing_field",
            RejectReason::InvalidNumeric { .. } => "invalid_numeric",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MalformedMessage(e) => write!(f, "Malformed message: {e}"),
            RejectReason::MissingField(field) => write!(f, "Missing field: {field}"),
            RejectReason::InvalidNumeric { field, raw } => {
                write!(f, "Invalid numeric value for {field}: {raw}")
            }
        }
    }
}

impl std::error::Error for RejectReason {}

/// Stateless message normalizer.
#[derive(Debug, Clone)]
pub struct Normalizer {
    outlier_threshold: f64,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTLIER_THRESHOLD)
    }
}

impl Normalizer {
    /// Create a normalizer with the given outlier threshold.
    pub fn new(outlier_threshold: f64) -> Self {
        Self { outlier_threshold }
    }

    /// Get the outlier threshold.
    pub fn outlier_threshold(&self) -> f64 {
        self.outlier_threshold
    }

    /// Normalize a raw message body.
    ///
    /// The steps run in order and the first failure wins:
    /// 1. Decode the body as a JSON object
    /// 2. Short-circuit on `{"Type": "END"}`
    /// 3. Extract `Timestamp` and `Value`
    /// 4. Resolve the timestamp unit and truncate to a UTC day
    /// 5. Classify the value against the outlier threshold
    pub fn normalize(&self, body: &[u8]) -> Result<Normalized, RejectReason> {
        let decoded: Value = serde_json::from_slice(body)
            .map_err(|e| RejectReason::MalformedMessage(e.to_string()))?;

        let Value::Object(record) = decoded else {
            return Err(RejectReason::MalformedMessage(
                "expected a JSON object".to_string(),
            ));
        };

        if record.get(TYPE_FIELD).and_then(Value::as_str) == Some(END_MARKER) {
            return Ok(Normalized::EndOfStream);
        }

        let raw_timestamp = required(&record, TIMESTAMP_FIELD)?;
        let raw_value = required(&record, VALUE_FIELD)?;

        let timestamp =
            parse_timestamp(raw_timestamp).ok_or_else(|| invalid(TIMESTAMP_FIELD, raw_timestamp))?;
        let value = parse_value(raw_value).ok_or_else(|| invalid(VALUE_FIELD, raw_value))?;

        let day = utc_day(resolve_epoch_seconds(timestamp))
            .ok_or_else(|| invalid(TIMESTAMP_FIELD, raw_timestamp))?;

        Ok(Normalized::Reading(
            NormalizedReading::new(day, value),
            self.classify(value),
        ))
    }

    /// Classify a value against the outlier threshold.
    pub fn classify(&self, value: f64) -> Classification {
        if value > self.outlier_threshold {
            Classification::Outlier
        } else {
            Classification::Normal
        }
    }
}

/// Convert a raw epoch timestamp to seconds, dividing by 1000 when it looks
/// like milliseconds.
pub fn resolve_epoch_seconds(timestamp: i64) -> i64 {
    if timestamp > MILLIS_THRESHOLD {
        timestamp.div_euclid(1000)
    } else {
        timestamp
    }
}

/// UTC calendar day containing the given epoch second.
pub fn utc_day(epoch_secs: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(epoch_secs, 0).map(|dt| dt.date_naive())
}

fn required<'a>(
    record: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, RejectReason> {
    match record.get(field) {
        None | Some(Value::Null) => Err(RejectReason::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn invalid(field: &'static str, raw: &Value) -> RejectReason {
    RejectReason::InvalidNumeric {
        field,
        raw: raw.to_string(),
    }
}

/// Integers are taken as-is, floats are truncated toward zero and numeric
/// strings must hold an integer.
fn parse_timestamp(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                let f = n.as_f64()?;
                if f.is_finite() && f.abs() < i64::MAX as f64 {
                    Some(f.trunc() as i64)
                } else {
                    None
                }
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_value(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}
