//! AMQP publisher for finalized daily averages.
//!
//! Holds one connection and channel for the whole run. Calls block on a
//! current-thread tokio runtime, so a slow broker stalls the pipeline.

use super::{RecordSink, SinkError};
use crate::config::OutboundConfig;
use crate::core::DailyAverageRecord;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::runtime::Runtime;

const PERSISTENT: u8 = 2;

/// Sink publishing to a durable queue via the default exchange.
pub struct AmqpSink {
    runtime: Runtime,
    connection: Connection,
    channel: Channel,
    queue: String,
}

impl AmqpSink {
    /// Connect and declare the durable queue.
    pub fn connect(config: &OutboundConfig) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            queue = %config.queue,
            "Connecting to AMQP broker"
        );

        let uri = config.amqp_uri();
        let (connection, channel) = runtime
            .block_on(async {
                let connection = Connection::connect(&uri, ConnectionProperties::default()).await?;
                let channel = connection.create_channel().await?;
                channel
                    .queue_declare(
                        &config.queue,
                        QueueDeclareOptions {
                            durable: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                Ok::<_, lapin::Error>((connection, channel))
            })
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        Ok(Self {
            runtime,
            connection,
            channel,
            queue: config.queue.clone(),
        })
    }
}

impl RecordSink for AmqpSink {
    fn publish(&mut self, record: &DailyAverageRecord) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(&record.to_message())
            .map_err(|e| SinkError::Serialization(e.to_string()))?;

        let channel = &self.channel;
        let queue = self.queue.as_str();
        self.runtime
            .block_on(async {
                channel
                    .basic_publish(
                        "",
                        queue,
                        BasicPublishOptions::default(),
                        &payload,
                        BasicProperties::default().with_delivery_mode(PERSISTENT),
                    )
                    .await?
                    .await
            })
            .map_err(|e| SinkError::Publish(e.to_string()))?;

        tracing::debug!(queue, day = %record.day, "Published daily average");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.runtime
            .block_on(self.connection.close(200, "OK"))
            .map_err(|e| SinkError::Publish(e.to_string()))
    }
}
