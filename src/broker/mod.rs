//! Broker connection interface
//!
//! The broker is an external collaborator. This module defines the seam the
//! recorder and playback talk through, so the MQTT client and the in-memory
//! test broker are interchangeable.
//!
//! # Architecture
//!
//! Opening a connection returns a [`BrokerLink`], which pairs:
//!
//! - a shared [`BrokerClient`] handle for subscribe/publish/disconnect, safe
//!   to call from many threads or tasks at once
//! - a channel of [`BrokerEvent`]s (connection outcome and inbound messages)
//!   fed by the transport's own background thread
//!
//! Connecting is asynchronous: [`BrokerConnector::open`] returns as soon as
//! the attempt has started. Callers that need a live connection before
//! continuing use [`BrokerLink::wait_connected`].
//!
//! # Components
//!
//! - [`mqtt::MqttConnector`] - Real MQTT broker via `rumqttc`
//! - [`memory::MemoryBroker`] - In-process broker with failure injection
//! - [`topic`] - MQTT topic filter matching

pub mod memory;
pub mod mqtt;
pub mod topic;

pub use memory::{MemoryBroker, MemoryConnector, PublishedMessage};
pub use mqtt::MqttConnector;
pub use topic::{topic_matches, validate_filter};

use crate::error::{ReplayError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something the transport reports asynchronously
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// The broker accepted the connection
    Connected,
    /// The broker refused the connection or the transport failed before it was up
    ConnectFailed { reason: String },
    /// A message arrived on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// An established connection dropped and the transport is retrying;
    /// a later [`BrokerEvent::Connected`] means subscriptions must be renewed
    Reconnecting { reason: String },
    /// The connection ended for good; `None` when we asked for it
    Disconnected { reason: Option<String> },
}

/// Shared handle for talking to a connected broker
///
/// Implementations must tolerate concurrent calls from multiple threads.
#[cfg_attr(test, mockall::automock)]
pub trait BrokerClient: Send + Sync {
    /// Subscribe to a topic filter (`#` and `+` wildcards allowed)
    fn subscribe(&self, filter: &str) -> Result<()>;

    /// Publish a payload to a topic
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Ask the transport to close the connection
    fn disconnect(&self) -> Result<()>;
}

/// Starts broker connections
pub trait BrokerConnector {
    /// Human readable broker address for messages
    fn address(&self) -> String;

    /// Begin connecting and return immediately
    fn open(&self) -> Result<BrokerLink>;
}

/// An open (or opening) broker connection
pub struct BrokerLink {
    client: Arc<dyn BrokerClient>,
    events: Receiver<BrokerEvent>,
    address: String,
}

impl std::fmt::Debug for BrokerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerLink")
            .field("address", &self.address)
            .field("pending_events", &self.events.len())
            .finish()
    }
}

impl BrokerLink {
    /// Pair a client with its event stream
    pub fn new(
        client: Arc<dyn BrokerClient>,
        events: Receiver<BrokerEvent>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            client,
            events,
            address: address.into(),
        }
    }

    /// Broker address this link points at
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Shared client handle
    pub fn client(&self) -> Arc<dyn BrokerClient> {
        Arc::clone(&self.client)
    }

    /// Inbound event stream
    pub fn events(&self) -> &Receiver<BrokerEvent> {
        &self.events
    }

    /// Split into client and event stream
    pub fn into_parts(self) -> (Arc<dyn BrokerClient>, Receiver<BrokerEvent>) {
        (self.client, self.events)
    }

    /// Block until the broker acknowledges the connection
    ///
    /// Messages that arrive first are discarded. A refusal is a connection
    /// error; silence past `timeout` is a connect timeout.
    pub fn wait_connected(&self, timeout: Duration) -> Result<()> {
        wait_for_connection(&self.events, &self.address, timeout)
    }

    /// Disconnect and wait up to `drain` for the transport to finish
    ///
    /// Publishes queued before this call are sent before the disconnect.
    pub fn close(self, drain: Duration) {
        if let Err(e) = self.client.disconnect() {
            tracing::warn!("Disconnect from {} failed: {}", self.address, e);
            return;
        }

        let deadline = Instant::now() + drain;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(BrokerEvent::Disconnected { .. }) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("Disconnected from {}", self.address);
                    return;
                }
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "Gave up waiting for {} to drain after {:?}",
                        self.address,
                        drain
                    );
                    return;
                }
            }
        }
    }
}

/// Consume events until the connection outcome is known
pub(crate) fn wait_for_connection(
    events: &Receiver<BrokerEvent>,
    address: &str,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(BrokerEvent::Connected) => {
                tracing::info!("Connection to {} successful", address);
                return Ok(());
            }
            Ok(BrokerEvent::ConnectFailed { reason }) => {
                return Err(ReplayError::Connection(format!(
                    "{} (check that the broker address {} is correct)",
                    reason, address
                )));
            }
            Ok(BrokerEvent::Disconnected { reason }) => {
                return Err(ReplayError::Connection(format!(
                    "{} closed the connection: {}",
                    address,
                    reason.unwrap_or_else(|| "no reason given".to_string())
                )));
            }
            Ok(BrokerEvent::Message { topic, .. }) => {
                tracing::trace!("Discarding early message on '{}'", topic);
            }
            Ok(BrokerEvent::Reconnecting { reason }) => {
                tracing::debug!("{} is reconnecting: {}", address, reason);
            }
            Err(RecvTimeoutError::Timeout) => {
                return Err(ReplayError::ConnectTimeout {
                    address: address.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ReplayError::Connection(format!(
                    "event stream for {} ended before connecting",
                    address
                )));
            }
        }
    }
}
