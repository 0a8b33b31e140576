//! MQTT broker connection via `rumqttc`
//!
//! The `rumqttc` event loop runs on a dedicated `mqtt-events` thread. It is
//! the only place network I/O happens: subscribe and publish calls queue
//! requests that the loop sends, and inbound packets are mapped to
//! [`BrokerEvent`]s on the link's channel.
//!
//! A transport error before the first acknowledgement ends the loop as a
//! failed connection. Once connected, a dropped connection is retried with a
//! growing delay and reported as [`BrokerEvent::Reconnecting`]; when the
//! attempts run out it ends as [`BrokerEvent::Disconnected`]. The loop also
//! ends after an explicit disconnect or when every client handle is dropped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS};

use super::{BrokerClient, BrokerConnector, BrokerEvent, BrokerLink};
use crate::config::{BrokerConfig, QualityOfService};
use crate::error::{ReplayError, Result};

/// Smallest keep-alive the client library accepts
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Reconnect delay stops growing after this many attempts
const MAX_BACKOFF_STEPS: u32 = 5;

static CLIENT_COUNTER: AtomicU32 = AtomicU32::new(0);

fn to_qos(qos: QualityOfService) -> QoS {
    match qos {
        QualityOfService::AtMostOnce => QoS::AtMostOnce,
        QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
        QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Retry schedule after an established connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectPolicy {
    fn from_config(config: &BrokerConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            delay: config.reconnect_delay(),
        }
    }

    /// Delay before the given 1-based attempt, or `None` once attempts run out
    fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.delay.saturating_mul(attempt.min(MAX_BACKOFF_STEPS)))
    }
}

/// Opens connections to a real MQTT broker
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: BrokerConfig,
}

impl MqttConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn client_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.config.client_id_prefix,
            std::process::id(),
            CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }
}

impl BrokerConnector for MqttConnector {
    fn address(&self) -> String {
        self.config.address()
    }

    fn open(&self) -> Result<BrokerLink> {
        let mut options = MqttOptions::new(self.client_id(), self.config.host.clone(), self.config.port);
        options.set_keep_alive(self.config.keep_alive().max(MIN_KEEP_ALIVE));

        let (client, connection) = Client::new(options, self.config.request_capacity.max(1));
        let (event_tx, event_rx) = unbounded();

        let address = self.address();
        let thread_address = address.clone();
        let policy = ReconnectPolicy::from_config(&self.config);
        std::thread::Builder::new()
            .name("mqtt-events".to_string())
            .spawn(move || drive_connection(connection, event_tx, &thread_address, policy))?;

        tracing::debug!("Connecting to MQTT broker at {}", address);

        let client = MqttClient {
            client,
            qos: to_qos(self.config.qos),
        };
        Ok(BrokerLink::new(Arc::new(client), event_rx, address))
    }
}

/// Run the `rumqttc` event loop until the connection ends
fn drive_connection(
    mut connection: Connection,
    events: Sender<BrokerEvent>,
    address: &str,
    policy: ReconnectPolicy,
) {
    let mut connected = false;
    let mut failures = 0u32;

    for notification in connection.iter() {
        let event = match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    failures = 0;
                    BrokerEvent::Connected
                } else {
                    BrokerEvent::ConnectFailed {
                        reason: format!("broker refused the connection: {:?}", ack.code),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => BrokerEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => BrokerEvent::Disconnected { reason: None },
            Ok(other) => {
                tracing::trace!("{}: {:?}", address, other);
                continue;
            }
            Err(e) if connected => {
                failures += 1;
                match policy.backoff(failures) {
                    Some(delay) => {
                        tracing::warn!(
                            "Connection to {} lost ({}), retrying in {:?} ({}/{})",
                            address,
                            e,
                            delay,
                            failures,
                            policy.max_attempts
                        );
                        let reconnecting = BrokerEvent::Reconnecting {
                            reason: e.to_string(),
                        };
                        if events.send(reconnecting).is_err() {
                            break;
                        }
                        // The next poll of the iterator reconnects
                        std::thread::sleep(delay);
                        continue;
                    }
                    None => BrokerEvent::Disconnected {
                        reason: Some(format!(
                            "{} (gave up after {} reconnect attempts)",
                            e, policy.max_attempts
                        )),
                    },
                }
            }
            Err(e) => BrokerEvent::ConnectFailed {
                reason: e.to_string(),
            },
        };

        let terminal = !matches!(event, BrokerEvent::Connected | BrokerEvent::Message { .. });
        if events.send(event).is_err() || terminal {
            break;
        }
    }

    tracing::debug!("MQTT event loop for {} stopped", address);
}

/// Client handle backed by `rumqttc`
struct MqttClient {
    client: Client,
    qos: QoS,
}

impl BrokerClient for MqttClient {
    fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .subscribe(filter, self.qos)
            .map_err(|e| ReplayError::Connection(format!("subscribe to '{}' failed: {}", filter, e)))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(topic, self.qos, false, payload.to_vec())
            .map_err(|e| ReplayError::publish(topic, e.to_string()))
    }

    fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .map_err(|e| ReplayError::Channel(format!("disconnect request failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_qos(QualityOfService::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_qos(QualityOfService::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn test_reconnect_backoff_grows_then_gives_up() {
        let policy = ReconnectPolicy {
            max_attempts: 7,
            delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.backoff(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.backoff(7), Some(Duration::from_millis(500)));
        assert_eq!(policy.backoff(8), None);
    }

    #[test]
    fn test_reconnect_disabled() {
        let mut config = BrokerConfig::default();
        config.reconnect_attempts = 0;
        assert_eq!(ReconnectPolicy::from_config(&config).backoff(1), None);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let connector = MqttConnector::new(BrokerConfig::default());
        assert_ne!(connector.client_id(), connector.client_id());
        assert!(connector.client_id().starts_with("mqtt-replay-"));
    }

    #[test]
    fn test_unreachable_broker_is_connection_error() {
        // Port 1 on loopback is closed on any sane test machine
        let mut config = BrokerConfig::with_host("127.0.0.1");
        config.port = 1;
        let link = MqttConnector::new(config).open().unwrap();

        let err = link.wait_connected(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Connection(_) | ReplayError::ConnectTimeout { .. }
        ));
    }
}
