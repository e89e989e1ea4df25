//! In-process transports.
//!
//! [`ChannelSource`] is the receiving half of a bounded crossbeam channel of
//! raw message bodies. The MQTT source feeds one from its connection
//! thread. [`MemorySink`] keeps published records in a `Vec`.

use super::{Received, ReadingSource, RecordSink, SinkError, SourceError};
use crate::core::DailyAverageRecord;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Create a bounded channel and the source reading from it.
///
/// Senders block when the channel is full, so a slow pipeline holds back
/// whoever is producing messages.
pub fn channel_source(capacity: usize) -> (Sender<Vec<u8>>, ChannelSource) {
    let (sender, receiver) = bounded(capacity);
    (sender, ChannelSource::new(receiver))
}

/// Source reading message bodies from a crossbeam channel.
///
/// Closed once every sender has been dropped and the channel is drained.
pub struct ChannelSource {
    receiver: Receiver<Vec<u8>>,
}

impl ChannelSource {
    /// Create a source over an existing receiver.
    pub fn new(receiver: Receiver<Vec<u8>>) -> Self {
        Self { receiver }
    }
}

impl ReadingSource for ChannelSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Received, SourceError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(body) => Ok(Received::Message(body)),
            Err(RecvTimeoutError::Timeout) => Ok(Received::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Received::Closed),
        }
    }
}

/// Sink that keeps every published record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<DailyAverageRecord>,
    fail: bool,
    closed: bool,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every publish.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Get the published records.
    pub fn records(&self) -> &[DailyAverageRecord] {
        &self.records
    }

    /// Whether the sink has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RecordSink for MemorySink {
    fn publish(&mut self, record: &DailyAverageRecord) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Publish("memory sink configured to fail".to_string()));
        }
        self.records.push(*record);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        Ok(())
    }
}
