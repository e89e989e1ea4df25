//! MQTT subscriber for inbound readings.
//!
//! The rumqttc event loop runs on its own thread and forwards every publish
//! on the configured topic into a bounded channel. Startup waits for the
//! broker's CONNACK; failing to get one within the timeout is fatal.

use super::channel::{channel_source, ChannelSource};
use super::{Received, ReadingSource, SourceError};
use crate::config::InboundConfig;
use crossbeam_channel::{bounded, RecvTimeoutError};
use rumqttc::{Client, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use std::thread;
use std::time::Duration;

const INBOUND_BUFFER: usize = 1024;
const REQUEST_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Source subscribed to one MQTT topic.
pub struct MqttSource {
    client: Client,
    inner: ChannelSource,
}

impl MqttSource {
    /// Connect to the broker and subscribe to the configured topic.
    pub fn connect(config: &InboundConfig) -> Result<Self, SourceError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        let (sender, inner) = channel_source(INBOUND_BUFFER);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let subscriber = client.clone();
        let topic = config.topic.clone();

        tracing::info!(
            host = %config.host,
            port = config.port,
            topic = %config.topic,
            "Connecting to MQTT broker"
        );

        thread::Builder::new()
            .name("mqtt-inbound".to_string())
            .spawn(move || {
                let mut connected = false;

                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code != ConnectReturnCode::Success {
                                let _ = ready_tx.try_send(Err(format!(
                                    "broker refused connection: {:?}",
                                    ack.code
                                )));
                                return;
                            }
                            // Clean sessions drop subscriptions, so subscribe on every CONNACK
                            if let Err(e) =
                                subscriber.try_subscribe(topic.as_str(), QoS::AtLeastOnce)
                            {
                                let _ = ready_tx.try_send(Err(format!("subscribe failed: {e}")));
                                return;
                            }
                            if !connected {
                                connected = true;
                                tracing::info!(topic = %topic, "Subscribed to topic");
                                let _ = ready_tx.try_send(Ok(()));
                            } else {
                                tracing::info!(topic = %topic, "Reconnected to MQTT broker");
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            // Receiver gone means the pipeline has stopped
                            if sender.send(publish.payload.to_vec()).is_err() {
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(e) if !connected => {
                            let _ = ready_tx.try_send(Err(e.to_string()));
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "MQTT connection error, reconnecting");
                            thread::sleep(RECONNECT_DELAY);
                        }
                    }
                }
            })?;

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(Self { client, inner }),
            Ok(Err(e)) => Err(SourceError::Unavailable(e)),
            Err(RecvTimeoutError::Timeout) => {
                let _ = client.try_disconnect();
                Err(SourceError::Unavailable(format!(
                    "no response from {}:{} within {}s",
                    config.host, config.port, config.connect_timeout_secs
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Unavailable(
                "MQTT event loop stopped before connecting".to_string(),
            )),
        }
    }
}

impl ReadingSource for MqttSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Received, SourceError> {
        self.inner.recv_timeout(timeout)
    }
}

impl Drop for MqttSource {
    fn drop(&mut self) {
        let _ = self.client.try_disconnect();
    }
}
