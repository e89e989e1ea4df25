//! Line-delimited transports.
//!
//! Each non-blank input line is one inbound message body. Lines are forwarded
//! as raw bytes; decoding is left to the normalizer, so a line that is not
//! valid UTF-8 is rejected on its own without ending the stream. Published
//! records are written one JSON object per line and flushed immediately.

use super::{Received, ReadingSource, RecordSink, SinkError, SourceError};
use crate::core::DailyAverageRecord;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

const LINE_BUFFER: usize = 1024;

/// Source reading message bodies line by line from a file or stdin.
///
/// A read error is reported once from [`ReadingSource::recv_timeout`] as
/// [`SourceError::Io`]; end of input shows up as [`Received::Closed`].
pub struct JsonlSource {
    receiver: Receiver<io::Result<Vec<u8>>>,
}

impl JsonlSource {
    /// Read messages from a file.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        tracing::info!("Reading messages from {}", path.display());
        Self::from_reader(BufReader::new(file))
    }

    /// Read messages from standard input.
    pub fn stdin() -> Result<Self, SourceError> {
        Self::from_reader(BufReader::new(io::stdin()))
    }

    /// Read messages from any buffered reader on a background thread.
    pub fn from_reader<R>(mut reader: R) -> Result<Self, SourceError>
    where
        R: BufRead + Send + 'static,
    {
        let (sender, receiver) = bounded(LINE_BUFFER);

        thread::Builder::new()
            .name("jsonl-reader".to_string())
            .spawn(move || {
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to read input line");
                            let _ = sender.send(Err(e));
                            break;
                        }
                    }

                    let body = strip_line_ending(&line);
                    if body.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    // Receiver gone means the pipeline has stopped
                    if sender.send(Ok(body.to_vec())).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self { receiver })
    }
}

impl ReadingSource for JsonlSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Received, SourceError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(body)) => Ok(Received::Message(body)),
            Ok(Err(e)) => Err(SourceError::Io(e)),
            Err(RecvTimeoutError::Timeout) => Ok(Received::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Received::Closed),
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Sink writing each record as one JSON line.
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl JsonlSink<BufWriter<File>> {
    /// Append records to a file, creating it if needed.
    pub fn append(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SinkError::Unavailable(format!("{}: {e}", path.display())))?;
        tracing::info!("Writing daily averages to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl JsonlSink<std::io::Stdout> {
    /// Write records to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> JsonlSink<W> {
    /// Create a sink over any writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Get the underlying writer back.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonlSink<W> {
    fn publish(&mut self, record: &DailyAverageRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(&record.to_message())
            .map_err(|e| SinkError::Serialization(e.to_string()))?;
        writeln!(self.writer, "{json}").map_err(|e| SinkError::Publish(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| SinkError::Publish(e.to_string()))
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.writer
            .flush()
            .map_err(|e| SinkError::Publish(e.to_string()))
    }
}
