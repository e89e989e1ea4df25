//! Integration tests for the preprocessing pipeline

use chrono::NaiveDate;
use pm25_preprocessor::core::{EngineState, Normalizer};
use pm25_preprocessor::pipeline::{Pipeline, RunOutcome, Step};
use pm25_preprocessor::transport::{channel_source, ChannelSource, MemorySink};
use pm25_preprocessor::{DailyAverageRecord, PipelineError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const END: &str = r#"{"Type": "END"}"#;

fn reading(timestamp: i64, value: f64) -> String {
    format!(r#"{{"Timestamp": {timestamp}, "Value": {value}}}"#)
}

/// Queue every message, close the channel, and run to completion.
fn run_messages(messages: &[String]) -> (Pipeline<ChannelSource, MemorySink>, RunOutcome) {
    let (sender, source) = channel_source(messages.len().max(1));
    for message in messages {
        sender.send(message.as_bytes().to_vec()).unwrap();
    }
    drop(sender);

    let mut pipeline = Pipeline::new(source, MemorySink::new(), Normalizer::default())
        .with_poll_interval(Duration::from_millis(10));
    let outcome = pipeline.run().expect("pipeline failed");
    (pipeline, outcome)
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_concrete_scenario() {
    let messages = vec![
        reading(1_700_000_000, 10.0),
        reading(1_700_003_600, 20.0),
        reading(1_700_090_000, 999.0),
        END.to_string(),
    ];
    let (pipeline, outcome) = run_messages(&messages);

    assert_eq!(outcome, RunOutcome::EndOfStream);
    assert_eq!(
        pipeline.sink().records(),
        &[DailyAverageRecord {
            day: day(2023, 11, 14),
            value: 15.0
        }]
    );
    assert!(pipeline.sink().is_closed());

    let stats = pipeline.stats();
    assert_eq!(stats.messages_received, 4);
    assert_eq!(stats.normal_readings, 2);
    assert_eq!(stats.outliers, 1);
}

#[test]
fn test_outlier_day_emits_before_end() {
    let (sender, source) = channel_source(8);
    let mut pipeline = Pipeline::new(source, MemorySink::new(), Normalizer::default());
    drop(sender);

    pipeline.handle(reading(1_700_000_000, 10.0).as_bytes()).unwrap();
    pipeline.handle(reading(1_700_003_600, 20.0).as_bytes()).unwrap();
    assert!(pipeline.sink().records().is_empty());

    // The outlier's day closes day one even though the outlier is dropped
    pipeline.handle(reading(1_700_090_000, 999.0).as_bytes()).unwrap();
    assert_eq!(pipeline.sink().records().len(), 1);
    assert_eq!(pipeline.engine().state(), EngineState::Idle);

    assert_eq!(pipeline.handle(END.as_bytes()).unwrap(), Step::Stop);
    assert_eq!(pipeline.sink().records().len(), 1);
}

#[test]
fn test_mean_independent_of_order() {
    let base = 1_700_000_000;
    let values = [3.0, 41.5, 12.25, 0.0, 50.0];
    let expected = values.iter().sum::<f64>() / values.len() as f64;

    let forward: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, v)| reading(base + i as i64, *v))
        .chain(std::iter::once(END.to_string()))
        .collect();
    let backward: Vec<String> = values
        .iter()
        .rev()
        .enumerate()
        .map(|(i, v)| reading(base + i as i64, *v))
        .chain(std::iter::once(END.to_string()))
        .collect();

    for messages in [forward, backward] {
        let (pipeline, _) = run_messages(&messages);
        let records = pipeline.sink().records();
        assert_eq!(records.len(), 1);
        assert!((records[0].value - expected).abs() < 1e-9);
    }
}

#[test]
fn test_day_boundary_emits_once_before_new_bucket() {
    let (sender, source) = channel_source(8);
    drop(sender);
    let mut pipeline = Pipeline::new(source, MemorySink::new(), Normalizer::default());

    pipeline.handle(reading(1_700_000_000, 4.0).as_bytes()).unwrap();
    pipeline.handle(reading(1_700_000_100, 6.0).as_bytes()).unwrap();
    pipeline.handle(reading(1_700_090_000, 30.0).as_bytes()).unwrap();

    assert_eq!(
        pipeline.sink().records(),
        &[DailyAverageRecord {
            day: day(2023, 11, 14),
            value: 5.0
        }]
    );
    let bucket = pipeline.engine().open_bucket().unwrap();
    assert_eq!(bucket.day(), day(2023, 11, 15));
    assert_eq!(bucket.count(), 1);
}

#[test]
fn test_end_flushes_open_day() {
    let messages = vec![
        reading(1_700_000_000, 8.0),
        reading(1_700_090_000, 2.0),
        reading(1_700_090_060, 4.0),
        END.to_string(),
    ];
    let (pipeline, outcome) = run_messages(&messages);

    assert_eq!(outcome, RunOutcome::EndOfStream);
    let records = pipeline.sink().records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].day, day(2023, 11, 15));
    assert_eq!(records[1].value, 3.0);
    assert_eq!(pipeline.engine().emitted(), records);
}

#[test]
fn test_end_without_readings_emits_nothing() {
    let (pipeline, outcome) = run_messages(&[END.to_string()]);

    assert_eq!(outcome, RunOutcome::EndOfStream);
    assert!(pipeline.sink().records().is_empty());
    assert!(pipeline.engine().emitted().is_empty());
}

#[test]
fn test_outliers_never_contribute() {
    let messages = vec![
        reading(1_700_000_000, 10.0),
        reading(1_700_000_010, 50.5),
        reading(1_700_000_020, 500.0),
        reading(1_700_000_030, 20.0),
        END.to_string(),
    ];
    let (pipeline, _) = run_messages(&messages);

    let records = pipeline.sink().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, 15.0);
    assert_eq!(pipeline.stats().outliers, 2);
}

#[test]
fn test_millisecond_and_second_timestamps_aggregate_together() {
    let messages = vec![
        reading(1_700_000_000, 10.0),
        reading(1_700_000_000_000, 30.0),
        END.to_string(),
    ];
    let (pipeline, _) = run_messages(&messages);

    let records = pipeline.sink().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, 20.0);
}

#[test]
fn test_rejected_messages_do_not_disturb_state() {
    let messages = vec![
        reading(1_700_000_000, 10.0),
        "not json".to_string(),
        r#"{"Value": 5}"#.to_string(),
        r#"{"Timestamp": 1700000000, "Value": "high"}"#.to_string(),
        r#"{"Timestamp": 1800000000, "Value": null}"#.to_string(),
        reading(1_700_000_500, 20.0),
        END.to_string(),
    ];
    let (pipeline, _) = run_messages(&messages);

    assert_eq!(pipeline.sink().records().len(), 1);
    assert_eq!(pipeline.sink().records()[0].value, 15.0);

    let stats = pipeline.stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.missing_field, 2);
    assert_eq!(stats.invalid_numeric, 1);
    assert_eq!(stats.rejected(), 4);
}

#[test]
fn test_messages_after_end_are_ignored() {
    let (sender, source) = channel_source(8);
    drop(sender);
    let mut pipeline = Pipeline::new(source, MemorySink::new(), Normalizer::default());

    pipeline.handle(reading(1_700_000_000, 10.0).as_bytes()).unwrap();
    assert_eq!(pipeline.handle(END.as_bytes()).unwrap(), Step::Stop);

    pipeline.handle(reading(1_700_090_000, 10.0).as_bytes()).unwrap();
    assert!(pipeline.engine().open_bucket().is_none());
    assert_eq!(pipeline.handle(END.as_bytes()).unwrap(), Step::Stop);
    assert_eq!(pipeline.sink().records().len(), 1);
}

#[test]
fn test_run_stops_at_end_and_leaves_rest_unread() {
    let messages = vec![
        reading(1_700_000_000, 10.0),
        END.to_string(),
        reading(1_700_090_000, 10.0),
    ];
    let (pipeline, outcome) = run_messages(&messages);

    assert_eq!(outcome, RunOutcome::EndOfStream);
    assert_eq!(pipeline.stats().messages_received, 2);
}

#[test]
fn test_source_closed_without_end_discards_open_day() {
    let messages = vec![
        reading(1_700_000_000, 10.0),
        reading(1_700_090_000, 20.0),
    ];
    let (pipeline, outcome) = run_messages(&messages);

    assert_eq!(outcome, RunOutcome::SourceClosed);
    // Day one closed by the boundary, day two lost with the source
    assert_eq!(pipeline.sink().records().len(), 1);
    assert!(pipeline.engine().open_bucket().is_none());
    assert!(!pipeline.sink().is_closed());
}

#[test]
fn test_shutdown_flag_interrupts_idle_wait() {
    let (sender, source) = channel_source(8);
    sender
        .send(reading(1_700_000_000, 10.0).into_bytes())
        .unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let mut pipeline = Pipeline::new(source, MemorySink::new(), Normalizer::default())
        .with_shutdown_flag(running.clone())
        .with_poll_interval(Duration::from_millis(10));

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
    });

    let outcome = pipeline.run().unwrap();
    stopper.join().unwrap();
    drop(sender);

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(pipeline.sink().records().is_empty());
    assert_eq!(pipeline.stats().normal_readings, 1);
}

#[test]
fn test_sink_failure_is_fatal() {
    let (sender, source) = channel_source(8);
    for message in [
        reading(1_700_000_000, 10.0),
        reading(1_700_090_000, 20.0),
        END.to_string(),
    ] {
        sender.send(message.into_bytes()).unwrap();
    }
    drop(sender);

    let mut pipeline = Pipeline::new(source, MemorySink::failing(), Normalizer::default());
    let result = pipeline.run();

    assert!(matches!(result, Err(PipelineError::Sink(_))));
    assert_eq!(pipeline.stats().messages_received, 2);
}

#[test]
fn test_custom_outlier_threshold() {
    let (sender, source) = channel_source(8);
    for message in [
        reading(1_700_000_000, 10.0),
        reading(1_700_000_001, 30.0),
        END.to_string(),
    ] {
        sender.send(message.into_bytes()).unwrap();
    }
    drop(sender);

    let mut pipeline = Pipeline::new(source, MemorySink::new(), Normalizer::new(20.0));
    pipeline.run().unwrap();

    assert_eq!(pipeline.sink().records()[0].value, 10.0);
    assert_eq!(pipeline.stats().outliers, 1);
}
