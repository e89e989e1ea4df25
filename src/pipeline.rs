//! The receive loop tying a source, the normalizer, the engine and a sink
//! together.
//!
//! Messages are processed strictly one at a time: normalization, the engine
//! transition and any resulting publish all finish before the next message is
//! taken from the source. A blocking sink therefore stalls consumption.

use crate::core::{Classification, DailyAggregator, Normalized, Normalizer};
use crate::stats::RunStats;
use crate::transport::{ReadingSource, Received, RecordSink, SinkError, SourceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

/// Why [`Pipeline::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// END was received and the last day flushed
    EndOfStream,
    /// The source ran dry without sending END
    SourceClosed,
    /// A stop was requested through the shutdown flag
    Interrupted,
}

/// Fatal pipeline errors.
#[derive(Debug)]
pub enum PipelineError {
    Source(SourceError),
    Sink(SinkError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Source(e) => write!(f, "{e}"),
            PipelineError::Sink(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Source(e) => Some(e),
            PipelineError::Sink(e) => Some(e),
        }
    }
}

impl From<SourceError> for PipelineError {
    fn from(e: SourceError) -> Self {
        PipelineError::Source(e)
    }
}

impl From<SinkError> for PipelineError {
    fn from(e: SinkError) -> Self {
        PipelineError::Sink(e)
    }
}

/// One run of the preprocessor over a single inbound stream.
pub struct Pipeline<S, K> {
    source: S,
    sink: K,
    normalizer: Normalizer,
    engine: DailyAggregator,
    stats: RunStats,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<S: ReadingSource, K: RecordSink> Pipeline<S, K> {
    pub fn new(source: S, sink: K, normalizer: Normalizer) -> Self {
        Self {
            source,
            sink,
            normalizer,
            engine: DailyAggregator::new(),
            stats: RunStats::new(),
            running: Arc::new(AtomicBool::new(true)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use an externally owned flag; clearing it stops [`Pipeline::run`].
    pub fn with_shutdown_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// How long each wait on the source lasts before the flag is rechecked.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn engine(&self) -> &DailyAggregator {
        &self.engine
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Pull messages until END, source exhaustion, or a stop request.
    pub fn run(&mut self) -> Result<RunOutcome, PipelineError> {
        info!(run_id = %self.stats.run_id, "Waiting for PM2.5 data and END signal");

        loop {
            if !self.running.load(Ordering::SeqCst) {
                self.abandon("Interrupted");
                return Ok(RunOutcome::Interrupted);
            }

            match self.source.recv_timeout(self.poll_interval)? {
                Received::Message(body) => {
                    if self.handle(&body)? == Step::Stop {
                        return Ok(RunOutcome::EndOfStream);
                    }
                }
                Received::Idle => {}
                Received::Closed => {
                    self.abandon("Source closed without END");
                    return Ok(RunOutcome::SourceClosed);
                }
            }
        }
    }

    /// Process one raw message body.
    pub fn handle(&mut self, body: &[u8]) -> Result<Step, PipelineError> {
        self.stats.record_received();

        let normalized = match self.normalizer.normalize(body) {
            Ok(normalized) => normalized,
            Err(reason) => {
                warn!(kind = reason.kind(), "Dropping message: {reason}");
                self.stats.record_rejected(&reason);
                return Ok(Step::Continue);
            }
        };

        match normalized {
            Normalized::EndOfStream if self.engine.has_ended() => {
                warn!("Duplicate END signal ignored");
                Ok(Step::Stop)
            }
            Normalized::EndOfStream => {
                info!("Received END signal");
                self.engine.handle_end_of_stream(&mut self.sink)?;
                self.sink.close()?;
                info!("{}", self.stats.summary(self.engine.emitted()));
                Ok(Step::Stop)
            }
            Normalized::Reading(reading, Classification::Outlier) => {
                self.stats.record_outlier();
                info!(day = %reading.day, value = reading.value, "Outlier reading excluded");
                self.engine.observe_day(reading.day, &mut self.sink)?;
                Ok(Step::Continue)
            }
            Normalized::Reading(reading, Classification::Normal) => {
                self.stats.record_normal();
                debug!(day = %reading.day, value = reading.value, "Normal reading");
                self.engine.update(&reading, &mut self.sink)?;
                Ok(Step::Continue)
            }
        }
    }

    fn abandon(&mut self, why: &str) {
        match self.engine.discard() {
            Some(bucket) => warn!(
                day = %bucket.day(),
                readings = bucket.count(),
                "{why}; open day discarded without emitting"
            ),
            None => warn!("{why}"),
        }
        info!("{}", self.stats.summary(self.engine.emitted()));
    }
}
