//! Daily aggregation state machine.
//!
//! The engine keeps at most one open [`Bucket`]. A reading for a different
//! day than the open bucket closes it, and its mean is handed to the sink
//! straight away. Day boundaries are detected from the data only; there is
//! no wall-clock timer.
//!
//! Readings are assumed to arrive in non-decreasing day order. A reading for
//! an earlier day than the open bucket is not treated specially: it closes
//! the open bucket like any other day change and starts a new one.

use crate::core::reading::{DailyAverageRecord, NormalizedReading};
use crate::transport::{RecordSink, SinkError};
use chrono::NaiveDate;
use tracing::{info, warn};

/// Running sum and count for one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    day: NaiveDate,
    sum: f64,
    count: u64,
}

impl Bucket {
    /// Create an empty bucket for a day.
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            sum: 0.0,
            count: 0,
        }
    }

    /// Add one value to the running sum.
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Get the bucket day.
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Get the running sum.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Get the number of values added.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the accumulated values, `None` for an empty bucket.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Observable state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Accumulating(NaiveDate),
}

/// Single-stream daily aggregator.
///
/// Owns the open bucket and the audit list of every record it emitted during
/// the run.
#[derive(Debug, Default)]
pub struct DailyAggregator {
    bucket: Option<Bucket>,
    emitted: Vec<DailyAverageRecord>,
    ended: bool,
}

impl DailyAggregator {
    /// Create an idle aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current engine state.
    pub fn state(&self) -> EngineState {
        match &self.bucket {
            Some(bucket) if bucket.count > 0 => EngineState::Accumulating(bucket.day),
            _ => EngineState::Idle,
        }
    }

    /// The currently open bucket, if any.
    pub fn open_bucket(&self) -> Option<&Bucket> {
        self.bucket.as_ref()
    }

    /// Records emitted so far, in emission order.
    pub fn emitted(&self) -> &[DailyAverageRecord] {
        &self.emitted
    }

    /// Whether end-of-stream has been handled.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Fold a normal reading into the aggregation.
    ///
    /// Returns the record for the previous day if this reading crossed a day
    /// boundary.
    pub fn update<K>(
        &mut self,
        reading: &NormalizedReading,
        sink: &mut K,
    ) -> Result<Option<DailyAverageRecord>, SinkError>
    where
        K: RecordSink + ?Sized,
    {
        if self.ended {
            warn!(day = %reading.day, value = reading.value, "Reading after end of stream dropped");
            return Ok(None);
        }

        let emitted = self.close_if_day_changed(reading.day, sink)?;

        self.bucket
            .get_or_insert_with(|| Bucket::new(reading.day))
            .add(reading.value);

        Ok(emitted)
    }

    /// Run the day-boundary check for a reading that is not aggregated.
    ///
    /// Used for outliers: their day still closes the open bucket, but they
    /// never open a new one.
    pub fn observe_day<K>(
        &mut self,
        day: NaiveDate,
        sink: &mut K,
    ) -> Result<Option<DailyAverageRecord>, SinkError>
    where
        K: RecordSink + ?Sized,
    {
        if self.ended {
            warn!(%day, "Day boundary check after end of stream ignored");
            return Ok(None);
        }
        self.close_if_day_changed(day, sink)
    }

    /// Close the open bucket and emit its mean.
    ///
    /// No-op when idle or when the bucket is empty. A sink failure is
    /// returned to the caller and the record is lost.
    pub fn finalize<K>(&mut self, sink: &mut K) -> Result<Option<DailyAverageRecord>, SinkError>
    where
        K: RecordSink + ?Sized,
    {
        let Some(record) = self.take_record() else {
            return Ok(None);
        };

        sink.publish(&record)?;
        info!("[DAILY AVG] {} -> {:.2}", record.day, record.value);
        self.emitted.push(record);

        Ok(Some(record))
    }

    /// Flush the open bucket and stop accepting readings.
    pub fn handle_end_of_stream<K>(
        &mut self,
        sink: &mut K,
    ) -> Result<Option<DailyAverageRecord>, SinkError>
    where
        K: RecordSink + ?Sized,
    {
        let emitted = self.finalize(sink)?;
        self.ended = true;
        Ok(emitted)
    }

    /// Drop the open bucket without emitting it.
    ///
    /// Returns what was discarded.
    pub fn discard(&mut self) -> Option<Bucket> {
        self.bucket.take().filter(|bucket| bucket.count > 0)
    }

    fn close_if_day_changed<K>(
        &mut self,
        day: NaiveDate,
        sink: &mut K,
    ) -> Result<Option<DailyAverageRecord>, SinkError>
    where
        K: RecordSink + ?Sized,
    {
        let day_changed = self.bucket.as_ref().is_some_and(|bucket| bucket.day != day);
        if day_changed {
            self.finalize(sink)
        } else {
            Ok(None)
        }
    }

    fn take_record(&mut self) -> Option<DailyAverageRecord> {
        let bucket = self.bucket.take()?;
        let value = bucket.mean()?;
        Some(DailyAverageRecord {
            day: bucket.day,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemorySink;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 11, d).unwrap()
    }

    fn reading(d: u32, value: f64) -> NormalizedReading {
        NormalizedReading::new(day(d), value)
    }

    #[test]
    fn test_bucket_mean() {
        let mut bucket = Bucket::new(day(1));
        assert_eq!(bucket.mean(), None);

        bucket.add(10.0);
        bucket.add(20.0);
        assert_eq!(bucket.count(), 2);
        assert_eq!(bucket.sum(), 30.0);
        assert_eq!(bucket.mean(), Some(15.0));
    }

    #[test]
    fn test_starts_idle() {
        let engine = DailyAggregator::new();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.open_bucket().is_none());
        assert!(engine.emitted().is_empty());
    }

    #[test]
    fn test_same_day_accumulates_without_emitting() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::new();

        assert_eq!(engine.update(&reading(14, 10.0), &mut sink).unwrap(), None);
        assert_eq!(engine.update(&reading(14, 20.0), &mut sink).unwrap(), None);

        assert_eq!(engine.state(), EngineState::Accumulating(day(14)));
        assert_eq!(engine.open_bucket().unwrap().count(), 2);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_day_change_emits_previous_day() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::new();

        engine.update(&reading(14, 10.0), &mut sink).unwrap();
        engine.update(&reading(14, 20.0), &mut sink).unwrap();
        let emitted = engine.update(&reading(15, 5.0), &mut sink).unwrap();

        let expected = DailyAverageRecord {
            day: day(14),
            value: 15.0,
        };
        assert_eq!(emitted, Some(expected));
        assert_eq!(sink.records(), &[expected]);
        assert_eq!(engine.emitted(), &[expected]);

        // The new reading opened a fresh bucket
        let bucket = engine.open_bucket().unwrap();
        assert_eq!(bucket.day(), day(15));
        assert_eq!(bucket.count(), 1);
        assert_eq!(bucket.sum(), 5.0);
    }

    #[test]
    fn test_earlier_day_also_closes_bucket() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::new();

        engine.update(&reading(15, 4.0), &mut sink).unwrap();
        let emitted = engine.update(&reading(14, 8.0), &mut sink).unwrap();

        assert_eq!(emitted.map(|r| r.day), Some(day(15)));
        assert_eq!(engine.state(), EngineState::Accumulating(day(14)));
    }

    #[test]
    fn test_observe_day_closes_without_opening() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::new();

        engine.update(&reading(14, 10.0), &mut sink).unwrap();
        assert_eq!(engine.observe_day(day(14), &mut sink).unwrap(), None);

        let emitted = engine.observe_day(day(15), &mut sink).unwrap();
        assert_eq!(emitted.map(|r| r.value), Some(10.0));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.open_bucket().is_none());

        // Idle engine has nothing to close
        assert_eq!(engine.observe_day(day(16), &mut sink).unwrap(), None);
    }

    #[test]
    fn test_finalize_when_idle_is_noop() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::new();

        assert_eq!(engine.finalize(&mut sink).unwrap(), None);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_end_of_stream_flushes_and_stops() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::new();

        engine.update(&reading(14, 3.0), &mut sink).unwrap();
        let flushed = engine.handle_end_of_stream(&mut sink).unwrap();
        assert_eq!(flushed.map(|r| r.value), Some(3.0));
        assert!(engine.has_ended());

        // Further readings are dropped
        assert_eq!(engine.update(&reading(15, 1.0), &mut sink).unwrap(), None);
        assert!(engine.open_bucket().is_none());
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn test_sink_failure_is_surfaced() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::failing();

        engine.update(&reading(14, 3.0), &mut sink).unwrap();
        let result = engine.update(&reading(15, 1.0), &mut sink);

        assert!(result.is_err());
        assert!(engine.emitted().is_empty());
    }

    #[test]
    fn test_discard_drops_open_bucket() {
        let mut engine = DailyAggregator::new();
        let mut sink = MemorySink::new();

        engine.update(&reading(14, 3.0), &mut sink).unwrap();
        let dropped = engine.discard().unwrap();
        assert_eq!(dropped.count(), 1);
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(sink.records().is_empty());
    }
}
