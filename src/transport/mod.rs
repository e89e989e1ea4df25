//! Inbound and outbound transports.
//!
//! The pipeline only sees two contracts: a [`ReadingSource`] that yields raw
//! message bodies one at a time, and a [`RecordSink`] that accepts finalized
//! daily averages. Broker clients live behind the `mqtt` and `amqp` features.

pub mod channel;
pub mod jsonl;

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(feature = "mqtt")]
pub mod mqtt;

use crate::core::DailyAverageRecord;
use std::time::Duration;

pub use channel::{channel_source, ChannelSource, MemorySink};
pub use jsonl::{JsonlSink, JsonlSource};

#[cfg(feature = "amqp")]
pub use amqp::AmqpSink;

#[cfg(feature = "mqtt")]
pub use mqtt::MqttSource;

/// Result of waiting on a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One raw message body
    Message(Vec<u8>),
    /// Nothing arrived before the timeout
    Idle,
    /// The source will never produce another message
    Closed,
}

/// Subscribe side: yields raw message bodies in delivery order.
pub trait ReadingSource {
    /// Block for up to `timeout` waiting for the next message.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Received, SourceError>;
}

impl<S: ReadingSource + ?Sized> ReadingSource for Box<S> {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Received, SourceError> {
        (**self).recv_timeout(timeout)
    }
}

/// Publish side: delivers each finalized record, blocking until accepted.
pub trait RecordSink {
    fn publish(&mut self, record: &DailyAverageRecord) -> Result<(), SinkError>;

    /// Release the underlying connection. Called once after end of stream.
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<K: RecordSink + ?Sized> RecordSink for Box<K> {
    fn publish(&mut self, record: &DailyAverageRecord) -> Result<(), SinkError> {
        (**self).publish(record)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}

/// Inbound transport errors.
#[derive(Debug)]
pub enum SourceError {
    /// Could not connect or subscribe
    Unavailable(String),
    /// Local input could not be read
    Io(std::io::Error),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable(e) => write!(f, "Source unavailable: {e}"),
            SourceError::Io(e) => write!(f, "Source IO error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io(e) => Some(e),
            SourceError::Unavailable(_) => None,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// Outbound transport errors. All of them are fatal to a run.
#[derive(Debug)]
pub enum SinkError {
    /// Could not connect to the outbound queue
    Unavailable(String),
    /// The queue rejected or failed to accept a record
    Publish(String),
    /// The record could not be encoded
    Serialization(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Unavailable(e) => write!(f, "Sink unavailable: {e}"),
            SinkError::Publish(e) => write!(f, "Publish failed: {e}"),
            SinkError::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}
